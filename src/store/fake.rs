//! In-memory [`Store`] double used by unit and scenario tests. No live
//! Postgres instance is available in this environment, so the pure
//! retrieval/fusion/scope logic is exercised against this fake while the SQL
//! the real store issues is covered by [`super::postgres`]'s own unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    Actor, ActorAlias, ActorLookupRow, Chunk, ChunkInsert, FileRecord, KeywordHit, Meta,
    ScopeFilter, Source, Store, VectorHit,
};

#[derive(Default)]
struct Inner {
    meta: Option<Meta>,
    files: HashMap<(String, &'static str), FileRecord>,
    chunks: HashMap<Uuid, Chunk>,
    cache: HashMap<(String, String, String, String), Vec<f32>>,
    actors: HashMap<String, Actor>,
    aliases: Vec<ActorAlias>,
}

pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn matches_filters(chunk: &Chunk, filters: &ScopeFilter) -> bool {
    if let Some(source) = filters.source {
        if chunk.source != source {
            return false;
        }
    }
    if let Some(session_key) = &filters.session_key {
        if chunk.session_key.as_deref() != Some(session_key.as_str()) {
            return false;
        }
    }
    let actor_scope_applies = !filters.actor_id_sessions_only || chunk.source == Source::Sessions;
    if actor_scope_applies {
        if let Some(actor_id) = &filters.actor_id {
            if &chunk.actor_id != actor_id {
                return false;
            }
        }
        if let Some(actor_type) = filters.actor_type {
            if chunk.actor_type != actor_type {
                return false;
            }
        }
    }
    if let Some(role) = filters.role {
        if chunk.role != role {
            return false;
        }
    }
    if let Some(after) = filters.updated_after {
        if chunk.updated_at < after {
            return false;
        }
    }
    if let Some(before) = filters.updated_before {
        if chunk.updated_at > before {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for FakeStore {
    async fn get_meta(&self) -> anyhow::Result<Option<Meta>> {
        Ok(self.inner.lock().unwrap().meta.clone())
    }

    async fn put_meta(&self, meta: &Meta) -> anyhow::Result<()> {
        self.inner.lock().unwrap().meta = Some(meta.clone());
        Ok(())
    }

    async fn purge_all(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.clear();
        inner.chunks.clear();
        inner.cache.clear();
        Ok(())
    }

    async fn list_files(&self, source: Source) -> anyhow::Result<Vec<FileRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .values()
            .filter(|f| f.source == source)
            .cloned()
            .collect())
    }

    async fn upsert_file(&self, file: &FileRecord) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert((file.path.clone(), file.source.as_str()), file.clone());
        Ok(())
    }

    async fn delete_file(&self, path: &str, source: Source) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(&(path.to_string(), source.as_str()));
        inner.chunks.retain(|_, c| !(c.path == path && c.source == source));
        Ok(())
    }

    async fn replace_chunks(&self, file: &FileRecord, chunks: Vec<ChunkInsert>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert((file.path.clone(), file.source.as_str()), file.clone());
        inner.chunks.retain(|_, c| !(c.path == file.path && c.source == file.source));
        let now = Utc::now();
        for insert in chunks {
            let id = Uuid::new_v4();
            inner.chunks.insert(
                id,
                Chunk {
                    id,
                    path: file.path.clone(),
                    source: file.source,
                    session_key: insert.session_key,
                    role: insert.role,
                    actor_type: insert.actor_type,
                    actor_id: insert.actor_id,
                    message_id: insert.message_id,
                    message_created_at: insert.message_created_at,
                    start_line: insert.start_line,
                    end_line: insert.end_line,
                    hash: insert.hash,
                    model: insert.model,
                    text: insert.text,
                    embedding: insert.embedding,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn get_cached_embeddings(
        &self,
        fingerprint: &str,
        hashes: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<f32>>> {
        let inner = self.inner.lock().unwrap();
        let mut out = HashMap::new();
        for hash in hashes {
            for ((_, _, fp, h), vector) in inner.cache.iter() {
                if fp == fingerprint && h == hash {
                    out.insert(hash.clone(), vector.clone());
                }
            }
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
        let mut inner = self.inner.lock().unwrap();
        for (hash, vector) in entries {
            inner.cache.insert(
                (provider.to_string(), model.to_string(), fingerprint.to_string(), hash.clone()),
                vector.clone(),
            );
        }
        Ok(())
    }

    async fn drop_stale_cache(&self, provider: &str, model: &str, keep_fingerprint: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .cache
            .retain(|(p, m, fp, _), _| !(p == provider && m == model && fp != keep_fingerprint));
        Ok(())
    }

    async fn ensure_vector_index(&self, _dims: u32) -> anyhow::Result<()> {
        Ok(())
    }

    async fn keyword_search(&self, query: &str, filters: &ScopeFilter, limit: usize) -> anyhow::Result<Vec<KeywordHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<KeywordHit> = inner
            .chunks
            .values()
            .filter(|c| matches_filters(c, filters))
            .filter_map(|c| {
                let text_lower = c.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(**t)).count();
                if matches == 0 {
                    None
                } else {
                    Some(KeywordHit {
                        chunk_id: c.id,
                        rank: matches as f32 / terms.len().max(1) as f32,
                    })
                }
            })
            .collect();
        hits.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search(&self, embedding: &[f32], filters: &ScopeFilter, limit: usize) -> anyhow::Result<Vec<VectorHit>> {
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<VectorHit> = inner
            .chunks
            .values()
            .filter(|c| matches_filters(c, filters))
            .filter(|c| !c.embedding.is_empty())
            .map(|c| VectorHit {
                chunk_id: c.id,
                similarity: cosine_similarity(embedding, &c.embedding),
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_chunks(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Chunk>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids.iter().filter_map(|id| inner.chunks.get(id).cloned()).collect())
    }

    async fn upsert_actor(&self, actor: &Actor) -> anyhow::Result<()> {
        self.inner.lock().unwrap().actors.insert(actor.actor_id.clone(), actor.clone());
        Ok(())
    }

    async fn upsert_alias(&self, alias: &ActorAlias) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.aliases.retain(|a| !(a.alias_norm == alias.alias_norm && a.actor_id == alias.actor_id));
        inner.aliases.push(alias.clone());
        Ok(())
    }

    async fn lookup_actors(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ActorLookupRow>> {
        let query_lower = query.to_lowercase();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<ActorLookupRow> = inner
            .actors
            .values()
            .filter_map(|actor| {
                let name_matches = actor
                    .display_name
                    .as_deref()
                    .map(|n| n.to_lowercase().contains(&query_lower))
                    .unwrap_or(false);
                let alias_confidence = inner
                    .aliases
                    .iter()
                    .filter(|a| a.actor_id == actor.actor_id && a.alias_norm.contains(&query_lower))
                    .map(|a| a.confidence)
                    .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))));
                if name_matches || alias_confidence.is_some() {
                    Some(ActorLookupRow {
                        actor_id: actor.actor_id.clone(),
                        actor_type: actor.actor_type,
                        display_name: actor.display_name.clone(),
                        confidence: alias_confidence.unwrap_or(0.0),
                    })
                } else {
                    None
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn file_count(&self, source: Source) -> anyhow::Result<u64> {
        Ok(self.inner.lock().unwrap().files.values().filter(|f| f.source == source).count() as u64)
    }
}
