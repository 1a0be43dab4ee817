//! Embedding provider abstraction: batch embedding with an initialization
//! fallback chain and a stable fingerprint for cache partitioning.

mod gemini;
mod local;
mod openai;

pub use gemini::GeminiEmbedding;
pub use local::LocalEmbedding;
pub use openai::OpenAiEmbedding;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MemoryIndexConfig;
use crate::fingerprint::compute_fingerprint;

/// Capability exposed by every embedding backend.
///
/// `embed_batch` must be length- and order-preserving: `embed_batch(xs).len()
/// == xs.len()`, and every returned vector shares the same, non-zero
/// dimensionality. Runtime (per-call) failures propagate to the caller —
/// only *construction* failures fall back, so query results stay stable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider identifier, e.g. `"openai"`, `"gemini"`, `"local"`.
    fn id(&self) -> &str;
    fn model(&self) -> &str;
    /// Embedding dimensionality this provider produces.
    fn dims(&self) -> usize;
    /// Stable hash over this provider's identity, used to partition the
    /// embedding cache.
    fn fingerprint(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        v.pop()
            .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
    }
}

/// Reported by the manager after construction: whether the requested
/// provider degraded to its configured fallback.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProviderStatus {
    pub fallback_from: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Wraps a working provider plus the fallback bookkeeping from
/// construction. Runtime failures are never retried against the fallback —
/// only initialization failures cause the degrade.
pub struct ActiveProvider {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub status: ProviderStatus,
}

/// Builds the configured provider, falling back to `config.fallback` if the
/// primary fails to construct (e.g. missing API key, invalid base URL).
pub fn create_embedding_provider(
    config: &MemoryIndexConfig,
    api_key: Option<String>,
) -> anyhow::Result<ActiveProvider> {
    match try_build(&config.provider, config, api_key.clone()) {
        Ok(provider) => Ok(ActiveProvider {
            provider,
            status: ProviderStatus::default(),
        }),
        Err(primary_err) => {
            tracing::warn!(
                provider = %config.provider,
                error = %primary_err,
                "embedding provider failed to initialize, falling back"
            );
            let fallback = try_build(&config.fallback, config, api_key)
                .map_err(|fallback_err| {
                    anyhow::anyhow!(
                        "primary provider '{}' failed ({primary_err}); fallback '{}' also failed ({fallback_err})",
                        config.provider,
                        config.fallback
                    )
                })?;
            Ok(ActiveProvider {
                provider: fallback,
                status: ProviderStatus {
                    fallback_from: Some(config.provider.clone()),
                    fallback_reason: Some(primary_err.to_string()),
                },
            })
        }
    }
}

fn try_build(
    id: &str,
    config: &MemoryIndexConfig,
    api_key: Option<String>,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match id {
        "openai" => {
            let key = api_key.ok_or_else(|| anyhow::anyhow!("openai provider requires an api key"))?;
            let base_url = config.remote.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Ok(Arc::new(OpenAiEmbedding::new(base_url, key, config.model.clone())?))
        }
        "gemini" => {
            let key = api_key.ok_or_else(|| anyhow::anyhow!("gemini provider requires an api key"))?;
            let base_url = config
                .remote
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
            Ok(Arc::new(GeminiEmbedding::new(base_url, key, config.model.clone())?))
        }
        "local" | "none" => Ok(Arc::new(LocalEmbedding::new(
            config.local.clone().unwrap_or_else(|| "local".to_string()),
            256,
        ))),
        other => anyhow::bail!("unknown embedding provider '{other}'"),
    }
}

pub(crate) fn provider_fingerprint(id: &str, model: &str, base_url: &str) -> String {
    compute_fingerprint(id, model, base_url, &[])
}
