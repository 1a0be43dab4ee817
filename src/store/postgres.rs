//! Postgres + pgvector implementation of the [`Store`] trait.
//!
//! Schema and query shapes are grounded on the single-table RAG store
//! pattern used elsewhere in this codebase (vector column cast via
//! `$N::vector`, cosine distance via the `<=>` operator, best-effort HNSW
//! index creation that degrades to a warning on older pgvector).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{
    Actor, ActorAlias, ActorLookupRow, ActorType, Chunk, ChunkInsert, FileRecord, KeywordHit,
    Meta, Role, ScopeFilter, Source, Store, VectorHit,
};
use crate::config::PostgresConfig;

/// Ceiling on the connect timeout so a misconfigured deployment cannot hang
/// startup indefinitely.
const CONNECT_TIMEOUT_CAP_SECS: u64 = 300;

pub struct PostgresStore {
    pool: Pool,
    schema: String,
}

impl PostgresStore {
    pub async fn new(config: &PostgresConfig, connect_timeout_secs: u64) -> anyhow::Result<Self> {
        let mut pool_config = PoolConfig::new();
        if let Some(url) = &config.url {
            pool_config.url = Some(url.clone());
        } else {
            pool_config.host = config.host.clone();
            pool_config.port = config.port;
            pool_config.user = config.user.clone();
            pool_config.password = config.password.clone();
            pool_config.dbname = config.database.clone();
        }
        let timeout = connect_timeout_secs.min(CONNECT_TIMEOUT_CAP_SECS);
        pool_config.connect_timeout = Some(std::time::Duration::from_secs(timeout));

        let pool = pool_config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        let store = Self {
            pool,
            schema: config.schema.clone(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};
                 CREATE EXTENSION IF NOT EXISTS vector;

                 CREATE TABLE IF NOT EXISTS {meta} (
                     key TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );

                 CREATE TABLE IF NOT EXISTS {files} (
                     path TEXT NOT NULL,
                     source TEXT NOT NULL,
                     session_key TEXT,
                     hash TEXT NOT NULL,
                     mtime TIMESTAMPTZ NOT NULL,
                     size BIGINT NOT NULL,
                     role TEXT,
                     actor_type TEXT,
                     actor_id TEXT,
                     PRIMARY KEY (path, source)
                 );

                 CREATE TABLE IF NOT EXISTS {chunks} (
                     id UUID PRIMARY KEY,
                     path TEXT NOT NULL,
                     source TEXT NOT NULL,
                     session_key TEXT,
                     role TEXT NOT NULL,
                     actor_type TEXT NOT NULL,
                     actor_id TEXT NOT NULL,
                     message_id TEXT,
                     message_created_at TIMESTAMPTZ,
                     start_line INTEGER NOT NULL,
                     end_line INTEGER NOT NULL,
                     hash TEXT NOT NULL,
                     model TEXT NOT NULL,
                     text TEXT NOT NULL,
                     embedding vector,
                     text_tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('english', text)) STORED,
                     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                 );

                 CREATE INDEX IF NOT EXISTS idx_chunks_path ON {chunks}(path);
                 CREATE INDEX IF NOT EXISTS idx_chunks_source ON {chunks}(source);
                 CREATE INDEX IF NOT EXISTS idx_chunks_model ON {chunks}(model);
                 CREATE INDEX IF NOT EXISTS idx_chunks_session_key ON {chunks}(session_key);
                 CREATE INDEX IF NOT EXISTS idx_chunks_actor_id ON {chunks}(actor_id);
                 CREATE INDEX IF NOT EXISTS idx_chunks_created_at ON {chunks}(created_at);
                 CREATE INDEX IF NOT EXISTS idx_chunks_updated_at ON {chunks}(updated_at);
                 CREATE INDEX IF NOT EXISTS idx_chunks_message_id ON {chunks}(message_id);
                 CREATE INDEX IF NOT EXISTS idx_chunks_message_created_at ON {chunks}(message_created_at);
                 CREATE INDEX IF NOT EXISTS idx_chunks_session_recency ON {chunks}(session_key, message_created_at DESC);
                 CREATE INDEX IF NOT EXISTS idx_chunks_tsv ON {chunks} USING GIN(text_tsv);

                 CREATE TABLE IF NOT EXISTS {cache} (
                     provider TEXT NOT NULL,
                     model TEXT NOT NULL,
                     fingerprint TEXT NOT NULL,
                     hash TEXT NOT NULL,
                     embedding vector NOT NULL,
                     dims INTEGER NOT NULL,
                     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                     PRIMARY KEY (provider, model, fingerprint, hash)
                 );

                 CREATE TABLE IF NOT EXISTS {actors} (
                     actor_id TEXT PRIMARY KEY,
                     actor_type TEXT NOT NULL,
                     display_name TEXT,
                     metadata JSONB
                 );

                 CREATE TABLE IF NOT EXISTS {aliases} (
                     alias_norm TEXT NOT NULL,
                     actor_id TEXT NOT NULL REFERENCES {actors}(actor_id),
                     alias TEXT NOT NULL,
                     source TEXT NOT NULL,
                     confidence REAL NOT NULL,
                     metadata JSONB,
                     PRIMARY KEY (alias_norm, actor_id)
                 );

                 CREATE INDEX IF NOT EXISTS idx_aliases_alias_norm ON {aliases}(alias_norm);

                 ALTER TABLE {files} ADD COLUMN IF NOT EXISTS role TEXT;
                 ALTER TABLE {files} ADD COLUMN IF NOT EXISTS actor_type TEXT;
                 ALTER TABLE {files} ADD COLUMN IF NOT EXISTS actor_id TEXT;
                 ALTER TABLE {chunks} ADD COLUMN IF NOT EXISTS message_id TEXT;
                 ALTER TABLE {chunks} ADD COLUMN IF NOT EXISTS message_created_at TIMESTAMPTZ;
                 ",
                schema = self.schema,
                meta = self.table("memory_meta"),
                files = self.table("memory_files"),
                chunks = self.table("memory_chunks"),
                cache = self.table("embedding_cache"),
                actors = self.table("memory_actors"),
                aliases = self.table("memory_actor_aliases"),
            ))
            .await?;
        Ok(())
    }
}

/// Formats a vector as the pgvector text literal (`[x1,x2,...]`), cast via
/// `$N::vector` at the call site.
fn vec_to_pgvector_literal(v: &[f32]) -> String {
    let mut s = String::from("[");
    for (i, x) in v.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&x.to_string());
    }
    s.push(']');
    s
}

fn parse_vector_literal(s: &str) -> Vec<f32> {
    s.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.parse::<f32>().ok())
        .collect()
}

fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

fn actor_type_from_str(s: &str) -> ActorType {
    match s {
        "agent" => ActorType::Agent,
        _ => ActorType::Human,
    }
}

fn source_from_str(s: &str) -> Source {
    match s {
        "sessions" => Source::Sessions,
        _ => Source::Memory,
    }
}

fn row_to_chunk(row: &Row) -> anyhow::Result<Chunk> {
    let embedding_str: Option<String> = row.try_get("embedding")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        source: source_from_str(row.try_get::<_, String>("source")?.as_str()),
        session_key: row.try_get("session_key")?,
        role: role_from_str(row.try_get::<_, String>("role")?.as_str()),
        actor_type: actor_type_from_str(row.try_get::<_, String>("actor_type")?.as_str()),
        actor_id: row.try_get("actor_id")?,
        message_id: row.try_get("message_id")?,
        message_created_at: row.try_get("message_created_at")?,
        start_line: row.try_get::<_, i32>("start_line")? as u32,
        end_line: row.try_get::<_, i32>("end_line")? as u32,
        hash: row.try_get("hash")?,
        model: row.try_get("model")?,
        text: row.try_get("text")?,
        embedding: embedding_str.map(|s| parse_vector_literal(&s)).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn build_scope_clause(filters: &ScopeFilter, params: &mut Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>>) -> String {
    let mut clauses = Vec::new();
    if let Some(source) = filters.source {
        params.push(Box::new(source.as_str().to_string()));
        clauses.push(format!("source = ${}", params.len()));
    }
    if let Some(session_key) = &filters.session_key {
        params.push(Box::new(session_key.clone()));
        clauses.push(format!("session_key = ${}", params.len()));
    }
    if let Some(actor_id) = &filters.actor_id {
        params.push(Box::new(actor_id.clone()));
        let idx = params.len();
        if filters.actor_id_sessions_only {
            clauses.push(format!("(source <> 'sessions' OR actor_id = ${idx})"));
        } else {
            clauses.push(format!("actor_id = ${idx}"));
        }
    }
    if let Some(actor_type) = filters.actor_type {
        params.push(Box::new(actor_type.as_str().to_string()));
        let idx = params.len();
        if filters.actor_id_sessions_only {
            clauses.push(format!("(source <> 'sessions' OR actor_type = ${idx})"));
        } else {
            clauses.push(format!("actor_type = ${idx}"));
        }
    }
    if let Some(role) = filters.role {
        params.push(Box::new(role.as_str().to_string()));
        clauses.push(format!("role = ${}", params.len()));
    }
    if let Some(after) = filters.updated_after {
        params.push(Box::new(after));
        clauses.push(format!("updated_at >= ${}", params.len()));
    }
    if let Some(before) = filters.updated_before {
        params.push(Box::new(before));
        clauses.push(format!("updated_at <= ${}", params.len()));
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_meta(&self) -> anyhow::Result<Option<Meta>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(&format!("SELECT key, value FROM {}", self.table("memory_meta")), &[])
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut map: HashMap<String, String> = HashMap::new();
        for row in rows {
            map.insert(row.get("key"), row.get("value"));
        }
        let get = |k: &str| map.get(k).cloned().unwrap_or_default();
        Ok(Some(Meta {
            model: get("model"),
            provider: get("provider"),
            provider_key: get("provider_key"),
            chunk_tokens: get("chunk_tokens").parse().unwrap_or(0),
            chunk_overlap: get("chunk_overlap").parse().unwrap_or(0),
            vector_dims: map.get("vector_dims").and_then(|v| v.parse().ok()),
        }))
    }

    async fn put_meta(&self, meta: &Meta) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let table = self.table("memory_meta");
        let entries: Vec<(&str, String)> = vec![
            ("model", meta.model.clone()),
            ("provider", meta.provider.clone()),
            ("provider_key", meta.provider_key.clone()),
            ("chunk_tokens", meta.chunk_tokens.to_string()),
            ("chunk_overlap", meta.chunk_overlap.to_string()),
            ("vector_dims", meta.vector_dims.map(|d| d.to_string()).unwrap_or_default()),
        ];
        for (key, value) in entries {
            client
                .execute(
                    &format!(
                        "INSERT INTO {table} (key, value) VALUES ($1, $2)
                         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value"
                    ),
                    &[&key, &value],
                )
                .await?;
        }
        Ok(())
    }

    async fn purge_all(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "TRUNCATE {}, {}, {};",
                self.table("memory_chunks"),
                self.table("memory_files"),
                self.table("embedding_cache"),
            ))
            .await?;
        Ok(())
    }

    async fn list_files(&self, source: Source) -> anyhow::Result<Vec<FileRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT path, source, session_key, hash, mtime, size, role, actor_type, actor_id
                     FROM {} WHERE source = $1",
                    self.table("memory_files")
                ),
                &[&source.as_str()],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(FileRecord {
                    path: row.try_get("path")?,
                    source: source_from_str(row.try_get::<_, String>("source")?.as_str()),
                    session_key: row.try_get("session_key")?,
                    hash: row.try_get("hash")?,
                    mtime: row.try_get("mtime")?,
                    size: row.try_get::<_, i64>("size")? as u64,
                    role: row.try_get::<_, Option<String>>("role")?.map(|s| role_from_str(&s)),
                    actor_type: row
                        .try_get::<_, Option<String>>("actor_type")?
                        .map(|s| actor_type_from_str(&s)),
                    actor_id: row.try_get("actor_id")?,
                })
            })
            .collect()
    }

    async fn upsert_file(&self, file: &FileRecord) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (path, source, session_key, hash, mtime, size, role, actor_type, actor_id)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                     ON CONFLICT (path, source) DO UPDATE SET
                         session_key = EXCLUDED.session_key,
                         hash = EXCLUDED.hash,
                         mtime = EXCLUDED.mtime,
                         size = EXCLUDED.size,
                         role = EXCLUDED.role,
                         actor_type = EXCLUDED.actor_type,
                         actor_id = EXCLUDED.actor_id",
                    self.table("memory_files")
                ),
                &[
                    &file.path,
                    &file.source.as_str(),
                    &file.session_key,
                    &file.hash,
                    &file.mtime,
                    &(file.size as i64),
                    &file.role.map(|r| r.as_str()),
                    &file.actor_type.map(|a| a.as_str()),
                    &file.actor_id,
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str, source: Source) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!("DELETE FROM {} WHERE path = $1 AND source = $2", self.table("memory_files")),
                &[&path, &source.as_str()],
            )
            .await?;
        client
            .execute(
                &format!("DELETE FROM {} WHERE path = $1 AND source = $2", self.table("memory_chunks")),
                &[&path, &source.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn replace_chunks(&self, file: &FileRecord, chunks: Vec<ChunkInsert>) -> anyhow::Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            &format!(
                "INSERT INTO {} (path, source, session_key, hash, mtime, size, role, actor_type, actor_id)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                 ON CONFLICT (path, source) DO UPDATE SET
                     session_key = EXCLUDED.session_key,
                     hash = EXCLUDED.hash,
                     mtime = EXCLUDED.mtime,
                     size = EXCLUDED.size,
                     role = EXCLUDED.role,
                     actor_type = EXCLUDED.actor_type,
                     actor_id = EXCLUDED.actor_id",
                self.table("memory_files")
            ),
            &[
                &file.path,
                &file.source.as_str(),
                &file.session_key,
                &file.hash,
                &file.mtime,
                &(file.size as i64),
                &file.role.map(|r| r.as_str()),
                &file.actor_type.map(|a| a.as_str()),
                &file.actor_id,
            ],
        )
        .await?;

        tx.execute(
            &format!("DELETE FROM {} WHERE path = $1 AND source = $2", self.table("memory_chunks")),
            &[&file.path, &file.source.as_str()],
        )
        .await?;
        for chunk in chunks {
            let now: DateTime<Utc> = Utc::now();
            let embedding_literal = vec_to_pgvector_literal(&chunk.embedding);
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, path, source, session_key, role, actor_type, actor_id,
                         message_id, message_created_at, start_line, end_line, hash, model, text,
                         embedding, created_at, updated_at)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15::vector,$16,$17)",
                    self.table("memory_chunks")
                ),
                &[
                    &Uuid::new_v4(),
                    &file.path,
                    &file.source.as_str(),
                    &chunk.session_key,
                    &chunk.role.as_str(),
                    &chunk.actor_type.as_str(),
                    &chunk.actor_id,
                    &chunk.message_id,
                    &chunk.message_created_at,
                    &(chunk.start_line as i32),
                    &(chunk.end_line as i32),
                    &chunk.hash,
                    &chunk.model,
                    &chunk.text,
                    &embedding_literal,
                    &now,
                    &now,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_cached_embeddings(
        &self,
        fingerprint: &str,
        hashes: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<f32>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT hash, embedding FROM {} WHERE fingerprint = $1 AND hash = ANY($2)",
                    self.table("embedding_cache")
                ),
                &[&fingerprint, &hashes],
            )
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let hash: String = row.try_get("hash")?;
            let embedding_str: String = row.try_get("embedding")?;
            out.insert(hash, parse_vector_literal(&embedding_str));
        }
        Ok(out)
    }

    async fn put_cached_embeddings(
        &self,
        provider: &str,
        model: &str,
        fingerprint: &str,
        entries: &[(String, Vec<f32>)],
    ) -> anyhow::Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        for (hash, embedding) in entries {
            let literal = vec_to_pgvector_literal(embedding);
            tx.execute(
                &format!(
                    "INSERT INTO {} (provider, model, fingerprint, hash, embedding, dims, updated_at)
                     VALUES ($1,$2,$3,$4,$5::vector,$6,now())
                     ON CONFLICT (provider, model, fingerprint, hash) DO UPDATE SET
                         embedding = EXCLUDED.embedding, dims = EXCLUDED.dims, updated_at = now()",
                    self.table("embedding_cache")
                ),
                &[&provider, &model, &fingerprint, hash, &literal, &(embedding.len() as i32)],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn drop_stale_cache(&self, provider: &str, model: &str, keep_fingerprint: &str) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE provider = $1 AND model = $2 AND fingerprint <> $3",
                    self.table("embedding_cache")
                ),
                &[&provider, &model, &keep_fingerprint],
            )
            .await?;
        Ok(())
    }

    async fn ensure_vector_index(&self, _dims: u32) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let result = client
            .batch_execute(&format!(
                "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON {}
                 USING hnsw (embedding vector_cosine_ops) WITH (m = 16, ef_construction = 200);",
                self.table("memory_chunks")
            ))
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to create HNSW vector index (pgvector >= 0.5 required); continuing without it");
        }
        Ok(())
    }

    async fn keyword_search(&self, query: &str, filters: &ScopeFilter, limit: usize) -> anyhow::Result<Vec<KeywordHit>> {
        let client = self.pool.get().await?;
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = vec![Box::new(query.to_string())];
        let scope_sql = build_scope_clause(filters, &mut params);
        let sql = format!(
            "SELECT id, ts_rank(text_tsv, websearch_to_tsquery('english', $1)) AS rank
             FROM {} WHERE text_tsv @@ websearch_to_tsquery('english', $1){scope_sql}
             ORDER BY rank DESC LIMIT {limit}",
            self.table("memory_chunks")
        );
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
        let rows = client.query(&sql, &param_refs).await?;
        rows.into_iter()
            .map(|row| {
                Ok(KeywordHit {
                    chunk_id: row.try_get("id")?,
                    rank: row.try_get("rank")?,
                })
            })
            .collect()
    }

    async fn vector_search(&self, embedding: &[f32], filters: &ScopeFilter, limit: usize) -> anyhow::Result<Vec<VectorHit>> {
        let client = self.pool.get().await?;
        let literal = vec_to_pgvector_literal(embedding);
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = vec![Box::new(literal)];
        let scope_sql = build_scope_clause(filters, &mut params);
        let sql = format!(
            "SELECT id, 1.0 - (embedding <=> $1::vector) AS similarity
             FROM {} WHERE embedding IS NOT NULL{scope_sql}
             ORDER BY embedding <=> $1::vector LIMIT {limit}",
            self.table("memory_chunks")
        );
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
        let rows = client.query(&sql, &param_refs).await?;
        rows.into_iter()
            .map(|row| {
                Ok(VectorHit {
                    chunk_id: row.try_get("id")?,
                    similarity: row.try_get("similarity")?,
                })
            })
            .collect()
    }

    async fn get_chunks(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT * FROM {} WHERE id = ANY($1)", self.table("memory_chunks")),
                &[&ids],
            )
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn upsert_actor(&self, actor: &Actor) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (actor_id, actor_type, display_name, metadata)
                     VALUES ($1,$2,$3,$4)
                     ON CONFLICT (actor_id) DO UPDATE SET
                         actor_type = EXCLUDED.actor_type,
                         display_name = EXCLUDED.display_name,
                         metadata = EXCLUDED.metadata",
                    self.table("memory_actors")
                ),
                &[&actor.actor_id, &actor.actor_type.as_str(), &actor.display_name, &actor.metadata],
            )
            .await?;
        Ok(())
    }

    async fn upsert_alias(&self, alias: &ActorAlias) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (alias_norm, actor_id, alias, source, confidence, metadata)
                     VALUES ($1,$2,$3,$4,$5,$6)
                     ON CONFLICT (alias_norm, actor_id) DO UPDATE SET
                         alias = EXCLUDED.alias,
                         source = EXCLUDED.source,
                         confidence = GREATEST({table}.confidence, EXCLUDED.confidence),
                         metadata = EXCLUDED.metadata",
                    self.table("memory_actor_aliases"),
                    table = self.table("memory_actor_aliases"),
                ),
                &[&alias.alias_norm, &alias.actor_id, &alias.alias, &alias.source, &alias.confidence, &alias.metadata],
            )
            .await?;
        Ok(())
    }

    async fn lookup_actors(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ActorLookupRow>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT a.actor_id, a.actor_type, a.display_name, MAX(COALESCE(al.confidence, 0)) AS confidence
                     FROM {actors} a
                     LEFT JOIN {aliases} al ON al.actor_id = a.actor_id
                     WHERE LOWER(COALESCE(a.display_name, '')) LIKE $1 OR al.alias_norm LIKE $1
                     GROUP BY a.actor_id, a.actor_type, a.display_name
                     ORDER BY confidence DESC, a.display_name ASC
                     LIMIT $2",
                    actors = self.table("memory_actors"),
                    aliases = self.table("memory_actor_aliases"),
                ),
                &[&pattern, &(limit as i64)],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ActorLookupRow {
                    actor_id: row.try_get("actor_id")?,
                    actor_type: actor_type_from_str(row.try_get::<_, String>("actor_type")?.as_str()),
                    display_name: row.try_get("display_name")?,
                    confidence: row.try_get("confidence")?,
                })
            })
            .collect()
    }

    async fn file_count(&self, source: Source) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!("SELECT COUNT(*) AS n FROM {} WHERE source = $1", self.table("memory_files")),
                &[&source.as_str()],
            )
            .await?;
        Ok(row.try_get::<_, i64>("n")? as u64)
    }
}

/// Constructs a [`PostgresStore`] behind an `Arc<dyn Store>`, the shape the
/// manager expects.
pub async fn connect(config: &PostgresConfig, connect_timeout_secs: u64) -> anyhow::Result<Arc<dyn Store>> {
    Ok(Arc::new(PostgresStore::new(config, connect_timeout_secs).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgvector_literal_empty() {
        assert_eq!(vec_to_pgvector_literal(&[]), "[]");
    }

    #[test]
    fn pgvector_literal_single() {
        assert_eq!(vec_to_pgvector_literal(&[1.5]), "[1.5]");
    }

    #[test]
    fn pgvector_literal_multi() {
        assert_eq!(vec_to_pgvector_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
    }

    #[test]
    fn parse_vector_literal_roundtrip() {
        let original = vec![1.0f32, 2.5, -3.0];
        let literal = vec_to_pgvector_literal(&original);
        let parsed = parse_vector_literal(&literal);
        assert_eq!(parsed, original);
    }

    #[test]
    fn scope_clause_empty_when_no_filters() {
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = Vec::new();
        let clause = build_scope_clause(&ScopeFilter::default(), &mut params);
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn scope_clause_session_restricts_to_sessions() {
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = Vec::new();
        let filters = ScopeFilter {
            source: Some(Source::Sessions),
            session_key: Some("k".into()),
            ..Default::default()
        };
        let clause = build_scope_clause(&filters, &mut params);
        assert!(clause.contains("source = $1"));
        assert!(clause.contains("session_key = $2"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn scope_clause_actor_sessions_only_exempts_non_session_rows() {
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = Vec::new();
        let filters = ScopeFilter {
            actor_id: Some("a1".into()),
            actor_id_sessions_only: true,
            ..Default::default()
        };
        let clause = build_scope_clause(&filters, &mut params);
        assert!(clause.contains("(source <> 'sessions' OR actor_id = $1)"));
    }

    #[test]
    fn scope_clause_actor_filter_without_sessions_only_applies_everywhere() {
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = Vec::new();
        let filters = ScopeFilter {
            actor_id: Some("a1".into()),
            ..Default::default()
        };
        let clause = build_scope_clause(&filters, &mut params);
        assert_eq!(clause, " AND actor_id = $1");
    }
}
