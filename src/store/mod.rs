//! Store-facing domain types and the storage seam every higher-level
//! component (indexer, cache, retriever, actor directory) programs against.

#[cfg(feature = "backend-postgres")]
pub mod postgres;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which source family a file or chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Memory,
    Sessions,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Memory => "memory",
            Source::Sessions => "sessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Human,
    Agent,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Human => "human",
            ActorType::Agent => "agent",
        }
    }
}

/// A chunk ready for (or retrieved from) persistence.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: uuid::Uuid,
    pub path: String,
    pub source: Source,
    pub session_key: Option<String>,
    pub role: Role,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub message_id: Option<String>,
    pub message_created_at: Option<DateTime<Utc>>,
    pub start_line: u32,
    pub end_line: u32,
    pub hash: String,
    pub model: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new chunk about to be inserted; `id`/timestamps are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub session_key: Option<String>,
    pub role: Role,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub message_id: Option<String>,
    pub message_created_at: Option<DateTime<Utc>>,
    pub start_line: u32,
    pub end_line: u32,
    pub hash: String,
    pub model: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub source: Source,
    pub session_key: Option<String>,
    pub hash: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub role: Option<Role>,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
}

/// Singleton row recording the embedding identity and chunking parameters
/// the current index was built with. A mismatch on any of the first four
/// fields forces a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub model: String,
    pub provider: String,
    pub provider_key: String,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
    pub vector_dims: Option<u32>,
}

impl Meta {
    /// Whether `self` and `other` share the identity fields that force a
    /// rebuild when they diverge (vector_dims is derived, not identity).
    pub fn identity_matches(&self, other: &Meta) -> bool {
        self.model == other.model
            && self.provider == other.provider
            && self.provider_key == other.provider_key
            && self.chunk_tokens == other.chunk_tokens
            && self.chunk_overlap == other.chunk_overlap
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub actor_id: String,
    pub actor_type: ActorType,
    pub display_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ActorAlias {
    pub alias_norm: String,
    pub actor_id: String,
    pub alias: String,
    pub source: String,
    pub confidence: f32,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorLookupRow {
    pub actor_id: String,
    pub actor_type: ActorType,
    pub display_name: Option<String>,
    pub confidence: f32,
}

/// Resolved scope filter handed down from the scope resolver to the store.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    /// `Some(source)` restricts to one source family; `None` means both.
    pub source: Option<Source>,
    pub session_key: Option<String>,
    pub actor_id: Option<String>,
    pub actor_type: Option<ActorType>,
    /// When set, `actor_id`/`actor_type` only constrain `Source::Sessions`
    /// rows; `Source::Memory` rows pass regardless of their actor fields.
    /// Actor-scoped queries set this so memory files stay visible across
    /// actors while session rows are narrowed to the resolved actor.
    pub actor_id_sessions_only: bool,
    pub role: Option<Role>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: uuid::Uuid,
    pub rank: f32,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: uuid::Uuid,
    pub similarity: f32,
}

/// Storage seam. The Postgres implementation lives behind the
/// `backend-postgres` feature; tests program against an in-memory fake.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_meta(&self) -> anyhow::Result<Option<Meta>>;
    async fn put_meta(&self, meta: &Meta) -> anyhow::Result<()>;
    /// Drops every chunk, file record, and cache row — used when the
    /// provider fingerprint or chunking parameters change.
    async fn purge_all(&self) -> anyhow::Result<()>;

    async fn list_files(&self, source: Source) -> anyhow::Result<Vec<FileRecord>>;
    async fn upsert_file(&self, file: &FileRecord) -> anyhow::Result<()>;
    async fn delete_file(&self, path: &str, source: Source) -> anyhow::Result<()>;

    /// Upserts `file` and replaces its prior chunks with `chunks`, both in a
    /// single transaction — the atomic unit a sync pass commits per file, so
    /// a crash between the two writes can never leave a file's stored hash
    /// out of sync with its chunks.
    async fn replace_chunks(&self, file: &FileRecord, chunks: Vec<ChunkInsert>) -> anyhow::Result<()>;

    async fn get_cached_embeddings(
        &self,
        fingerprint: &str,
        hashes: &[String],
    ) -> anyhow::Result<std::collections::HashMap<String, Vec<f32>>>;

    async fn put_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        fingerprint: &str,
        entries: &[(String, Vec<f32>)],
    ) -> anyhow::Result<()>;

    /// Drops cache rows for `(provider, model, fingerprint)` tuples other
    /// than `keep_fingerprint` — the fingerprint-invalidation sweep.
    async fn drop_stale_cache(&self, provider: &str, model: &str, keep_fingerprint: &str) -> anyhow::Result<()>;

    async fn ensure_vector_index(&self, dims: u32) -> anyhow::Result<()>;

    async fn keyword_search(
        &self,
        query: &str,
        filters: &ScopeFilter,
        limit: usize,
    ) -> anyhow::Result<Vec<KeywordHit>>;

    async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &ScopeFilter,
        limit: usize,
    ) -> anyhow::Result<Vec<VectorHit>>;

    async fn get_chunks(&self, ids: &[uuid::Uuid]) -> anyhow::Result<Vec<Chunk>>;

    async fn upsert_actor(&self, actor: &Actor) -> anyhow::Result<()>;
    async fn upsert_alias(&self, alias: &ActorAlias) -> anyhow::Result<()>;
    async fn lookup_actors(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ActorLookupRow>>;

    async fn file_count(&self, source: Source) -> anyhow::Result<u64>;
}
