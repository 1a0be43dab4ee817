//! Executes vector, keyword, or hybrid search, fuses the two signals, and
//! clamps results. Citation decoration deliberately stays out of this
//! module — it lives at the tool surface so the retriever stays a
//! deterministic, source-of-truth component.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::embedding::EmbeddingProvider;
use crate::store::{ScopeFilter, Source, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Vector,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub max_results: usize,
    pub min_score: f32,
    pub filters: ScopeFilter,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    pub snippet: String,
    pub source: String,
}

const MAX_SNIPPET_CHARS: usize = 700;
const MIN_CANDIDATES: usize = 1;
const MAX_CANDIDATES: usize = 200;

pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_weight: f32,
    text_weight: f32,
    candidate_multiplier: f64,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_weight: f32,
        text_weight: f32,
        candidate_multiplier: f64,
    ) -> Self {
        Self {
            store,
            embedder,
            vector_weight,
            text_weight,
            candidate_multiplier,
        }
    }

    pub async fn search(&self, req: &SearchRequest) -> anyhow::Result<Vec<SearchHit>> {
        if req.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut filters = req.filters.clone();
        filters.updated_after = req.updated_after;
        filters.updated_before = req.updated_before;

        let candidates = ((req.max_results as f64 * self.candidate_multiplier).floor() as usize)
            .clamp(MIN_CANDIDATES, MAX_CANDIDATES);

        let mut keyword_hits = Vec::new();
        if req.mode != SearchMode::Vector {
            keyword_hits = self.store.keyword_search(&req.query, &filters, candidates).await?;
        }

        let mut vector_hits = Vec::new();
        let mut vector_degraded = false;
        if req.mode != SearchMode::Keyword {
            let embedding = self.embedder.embed_query(&req.query).await?;
            if embedding.iter().all(|x| *x == 0.0) {
                vector_degraded = true;
            } else {
                vector_hits = self.store.vector_search(&embedding, &filters, candidates).await?;
            }
        }

        let fused: Vec<(uuid::Uuid, f32, f32, f32)> = match req.mode {
            SearchMode::Keyword => keyword_hits
                .iter()
                .map(|h| (h.chunk_id, 0.0, h.rank, h.rank))
                .collect(),
            SearchMode::Vector => {
                if vector_degraded {
                    Vec::new()
                } else {
                    vector_hits
                        .iter()
                        .map(|h| (h.chunk_id, h.similarity, 0.0, h.similarity))
                        .collect()
                }
            }
            SearchMode::Hybrid => {
                if vector_degraded {
                    // Keyword-only fallback when the query embedding is
                    // all-zero (provider degraded).
                    keyword_hits.iter().map(|h| (h.chunk_id, 0.0, h.rank, h.rank)).collect()
                } else {
                    fuse(&vector_hits, &keyword_hits, self.vector_weight, self.text_weight)
                }
            }
        };

        let mut scored: Vec<(uuid::Uuid, f32, f32, f32)> = fused
            .into_iter()
            .filter(|(_, _, _, score)| *score >= req.min_score)
            .collect();
        scored.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
        });
        scored.truncate(req.max_results);

        let ids: Vec<uuid::Uuid> = scored.iter().map(|(id, ..)| *id).collect();
        let chunks = self.store.get_chunks(&ids).await?;
        let chunk_map: std::collections::HashMap<uuid::Uuid, _> = chunks.into_iter().map(|c| (c.id, c)).collect();

        let mut hits = Vec::with_capacity(scored.len());
        for (id, _, _, score) in scored {
            if let Some(chunk) = chunk_map.get(&id) {
                hits.push(SearchHit {
                    path: chunk.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    score,
                    snippet: truncate_snippet(&chunk.text),
                    source: chunk_source_label(chunk.source),
                });
            }
        }
        Ok(hits)
    }
}

fn chunk_source_label(source: Source) -> String {
    source.as_str().to_string()
}

/// Linear-combination fusion over the union of vector and keyword hits.
/// Missing scores are treated as 0.
fn fuse(
    vector_hits: &[crate::store::VectorHit],
    keyword_hits: &[crate::store::KeywordHit],
    vector_weight: f32,
    text_weight: f32,
) -> Vec<(uuid::Uuid, f32, f32, f32)> {
    let mut by_id: std::collections::HashMap<uuid::Uuid, (f32, f32)> = std::collections::HashMap::new();
    for h in vector_hits {
        by_id.entry(h.chunk_id).or_insert((0.0, 0.0)).0 = h.similarity;
    }
    for h in keyword_hits {
        by_id.entry(h.chunk_id).or_insert((0.0, 0.0)).1 = h.rank;
    }
    by_id
        .into_iter()
        .map(|(id, (v, t))| (id, v, t, vector_weight * v + text_weight * t))
        .collect()
}

/// Truncates to 700 UTF-16-safe characters (never splits a surrogate pair).
fn truncate_snippet(text: &str) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() <= MAX_SNIPPET_CHARS {
        return text.to_string();
    }
    String::from_utf16_lossy(&units[..MAX_SNIPPET_CHARS])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::store::fake::FakeStore;
    use crate::store::{ActorType, ChunkInsert, Role};

    async fn seed(store: &FakeStore, path: &str, text: &str, embedding: Vec<f32>) {
        store
            .replace_chunks(
                &crate::store::FileRecord {
                    path: path.to_string(),
                    source: Source::Memory,
                    session_key: None,
                    hash: "h".into(),
                    mtime: Utc::now(),
                    size: text.len() as u64,
                    role: None,
                    actor_type: None,
                    actor_id: None,
                },
                vec![ChunkInsert {
                    session_key: None,
                    role: Role::System,
                    actor_type: ActorType::Human,
                    actor_id: "u1".into(),
                    message_id: None,
                    message_created_at: None,
                    start_line: 1,
                    end_line: 1,
                    hash: "h".into(),
                    model: "local".into(),
                    text: text.into(),
                    embedding,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_query_returns_empty_without_touching_store() {
        let store = Arc::new(FakeStore::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LocalEmbedding::new("local".into(), 8));
        let retriever = Retriever::new(store, embedder, 0.5, 0.5, 4.0);
        let hits = retriever
            .search(&SearchRequest {
                query: "   ".into(),
                mode: SearchMode::Hybrid,
                max_results: 10,
                min_score: 0.0,
                filters: ScopeFilter::default(),
                updated_after: None,
                updated_before: None,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn s1_keyword_exact_match_recall() {
        let store = Arc::new(FakeStore::new());
        seed(&store, "memory/2024-06-01.md", "Meeting with Alice about budget", vec![]).await;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LocalEmbedding::new("local".into(), 8));
        let retriever = Retriever::new(store, embedder, 0.5, 0.5, 4.0);
        let hits = retriever
            .search(&SearchRequest {
                query: "budget".into(),
                mode: SearchMode::Keyword,
                max_results: 10,
                min_score: 0.0,
                filters: ScopeFilter::default(),
                updated_after: None,
                updated_before: None,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "memory/2024-06-01.md");
        assert_eq!(hits[0].start_line, 1);
        assert_eq!(hits[0].end_line, 1);
    }

    #[test]
    fn s5_hybrid_fusion_respects_weighted_sum() {
        let chunk_a = uuid::Uuid::new_v4();
        let chunk_b = uuid::Uuid::new_v4();
        let vector_hits = vec![
            crate::store::VectorHit { chunk_id: chunk_a, similarity: 0.1 },
            crate::store::VectorHit { chunk_id: chunk_b, similarity: 0.9 },
        ];
        let keyword_hits = vec![
            crate::store::KeywordHit { chunk_id: chunk_a, rank: 0.9 },
            crate::store::KeywordHit { chunk_id: chunk_b, rank: 0.1 },
        ];
        let fused = fuse(&vector_hits, &keyword_hits, 0.5, 0.5);
        let score_a = fused.iter().find(|(id, ..)| *id == chunk_a).unwrap().3;
        let score_b = fused.iter().find(|(id, ..)| *id == chunk_b).unwrap().3;
        assert!((score_a - 0.5).abs() < 1e-6);
        assert!((score_b - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fusion_treats_missing_scores_as_zero() {
        let chunk_a = uuid::Uuid::new_v4();
        let vector_hits = vec![crate::store::VectorHit { chunk_id: chunk_a, similarity: 0.8 }];
        let fused = fuse(&vector_hits, &[], 0.6, 0.4);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].3 - 0.48).abs() < 1e-6);
    }

    #[test]
    fn snippet_truncated_to_700_utf16_units() {
        let text = "a".repeat(1000);
        let snippet = truncate_snippet(&text);
        assert_eq!(snippet.encode_utf16().count(), MAX_SNIPPET_CHARS);
    }

    #[test]
    fn snippet_shorter_than_limit_is_untouched() {
        let text = "short snippet";
        assert_eq!(truncate_snippet(text), text);
    }
}
