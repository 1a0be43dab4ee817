//! Top-level wiring: constructs the store, embedding provider, retriever,
//! indexer, sync coordinator, actor directory, and tool surface from a
//! single [`MemoryIndexConfig`], and owns the identity-mismatch rebuild
//! decision.

use std::path::PathBuf;
use std::sync::Arc;

use crate::actors::ActorDirectory;
use crate::config::MemoryIndexConfig;
use crate::embedding::{create_embedding_provider, EmbeddingProvider, ProviderStatus};
use crate::indexer::{enumerate_memory_candidates, enumerate_session_candidates, Indexer};
use crate::retriever::Retriever;
use crate::store::{Meta, Store};
use crate::sync::{CandidateProvider, SyncCoordinator, SyncOutcome, SyncReason};
use crate::tools::ToolSurface;

pub struct MemoryIndexManager {
    pub store: Arc<dyn Store>,
    pub retriever: Arc<Retriever>,
    pub indexer: Arc<Indexer>,
    pub sync: Arc<SyncCoordinator>,
    pub actors: Arc<ActorDirectory>,
    pub tools: Arc<ToolSurface>,
    pub provider_status: ProviderStatus,
}

impl MemoryIndexManager {
    /// Builds a manager against an already-constructed store. The
    /// `backend-postgres`-gated [`crate::store::postgres::connect`] is the
    /// production entry point; this constructor is the seam tests and
    /// alternate backends use directly.
    pub async fn from_store(
        store: Arc<dyn Store>,
        config: &MemoryIndexConfig,
        api_key: Option<String>,
        workspace: PathBuf,
        session_transcripts_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        if config.sources.is_empty() {
            anyhow::bail!("memory index requires at least one configured source");
        }

        let active = create_embedding_provider(config, api_key)?;
        let provider: Arc<dyn EmbeddingProvider> = active.provider;

        let desired_meta = Meta {
            model: provider.model().to_string(),
            provider: provider.id().to_string(),
            provider_key: provider.fingerprint().to_string(),
            chunk_tokens: config.chunking.tokens,
            chunk_overlap: config.chunking.overlap,
            vector_dims: Some(provider.dims() as u32),
        };
        if let Some(existing) = store.get_meta().await? {
            if !existing.identity_matches(&desired_meta) {
                tracing::warn!("embedding identity changed, purging the index for a full rebuild");
                store.purge_all().await?;
            }
        }
        store.put_meta(&desired_meta).await?;

        let extra_paths: Vec<PathBuf> = config.extra_paths.iter().map(PathBuf::from).collect();
        let hybrid = &config.query.hybrid;

        let indexer = Arc::new(Indexer::new(store.clone(), provider.clone(), config.chunking.clone()));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            provider.clone(),
            hybrid.vector_weight as f32,
            hybrid.text_weight as f32,
            hybrid.candidate_multiplier,
        ));
        let actors = Arc::new(ActorDirectory::new(store.clone()));
        let tools = Arc::new(ToolSurface::new(
            retriever.clone(),
            actors.clone(),
            provider.clone(),
            active.status.clone(),
            config.store.vector.enabled,
            workspace.clone(),
            extra_paths.clone(),
            config.citations,
        ));

        let index_memory = config.sources.iter().any(|s| s == "memory");
        let index_sessions = config.sources.iter().any(|s| s == "sessions");

        let memory_provider: CandidateProvider = {
            let workspace = workspace.clone();
            let extra_paths = extra_paths.clone();
            Arc::new(move || {
                let workspace = workspace.clone();
                let extra_paths = extra_paths.clone();
                Box::pin(async move {
                    if index_memory {
                        enumerate_memory_candidates(&workspace, &extra_paths).await
                    } else {
                        Ok(Vec::new())
                    }
                })
            })
        };
        let session_provider: CandidateProvider = {
            let dir = session_transcripts_dir.clone();
            Arc::new(move || {
                let dir = dir.clone();
                Box::pin(async move {
                    if index_sessions {
                        enumerate_session_candidates(&dir).await
                    } else {
                        Ok(Vec::new())
                    }
                })
            })
        };

        let sync = Arc::new(SyncCoordinator::new(
            indexer.clone(),
            memory_provider,
            session_provider,
            Some(actors.clone()),
            None,
        ));

        Ok(Self {
            store,
            retriever,
            indexer,
            sync,
            actors,
            tools,
            provider_status: active.status,
        })
    }

    pub async fn sync_now(&self, reason: SyncReason) -> anyhow::Result<SyncOutcome> {
        self.sync.sync(reason).await
    }

    pub fn warm_session(&self, session_key: String) {
        self.sync.warm_session(session_key);
    }
}

#[cfg(feature = "backend-postgres")]
impl MemoryIndexManager {
    pub async fn new(
        config: &MemoryIndexConfig,
        api_key: Option<String>,
        workspace: PathBuf,
        session_transcripts_dir: PathBuf,
        connect_timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let store = crate::store::postgres::connect(&config.store.postgres, connect_timeout_secs).await?;
        Self::from_store(store, config, api_key, workspace, session_transcripts_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;

    fn local_config() -> MemoryIndexConfig {
        MemoryIndexConfig {
            provider: "local".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_empty_sources_at_construction() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new());
        let config = MemoryIndexConfig {
            sources: vec![],
            ..local_config()
        };
        let result = MemoryIndexManager::from_store(store, &config, None, PathBuf::from("/tmp"), PathBuf::from("/tmp")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builds_successfully_with_the_local_provider() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new());
        let config = local_config();
        let manager =
            MemoryIndexManager::from_store(store, &config, None, PathBuf::from("/tmp"), PathBuf::from("/tmp")).await.unwrap();
        assert!(manager.provider_status.fallback_from.is_none());
    }

    #[tokio::test]
    async fn purges_the_index_when_the_embedding_identity_changes() {
        let concrete = Arc::new(FakeStore::new());
        let store: Arc<dyn Store> = concrete.clone();
        store
            .put_meta(&Meta {
                model: "stale-model".to_string(),
                provider: "local".to_string(),
                provider_key: "stale-fingerprint".to_string(),
                chunk_tokens: 512,
                chunk_overlap: 64,
                vector_dims: Some(256),
            })
            .await
            .unwrap();
        store
            .replace_chunks(
                &crate::store::FileRecord {
                    path: "memory/a.md".to_string(),
                    source: crate::store::Source::Memory,
                    session_key: None,
                    hash: "stale-hash".into(),
                    mtime: chrono::Utc::now(),
                    size: 11,
                    role: None,
                    actor_type: None,
                    actor_id: None,
                },
                vec![crate::store::ChunkInsert {
                    session_key: None,
                    role: crate::store::Role::System,
                    actor_type: crate::store::ActorType::Human,
                    actor_id: String::new(),
                    message_id: None,
                    message_created_at: None,
                    start_line: 1,
                    end_line: 1,
                    hash: "h".into(),
                    model: "stale-model".into(),
                    text: "stale chunk".into(),
                    embedding: vec![1.0],
                }],
            )
            .await
            .unwrap();

        let config = local_config();
        let manager =
            MemoryIndexManager::from_store(store.clone(), &config, None, PathBuf::from("/tmp"), PathBuf::from("/tmp"))
                .await
                .unwrap();
        let _ = manager;
        assert_eq!(concrete.chunk_count(), 0);
    }
}
