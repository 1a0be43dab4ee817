//! Gemini-compatible embedding client:
//! `POST {base_url}/models/{model}:batchEmbedContents`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::fingerprint::compute_fingerprint;

const BATCH_SIZE: usize = 50;
const MAX_RETRIES: u32 = 3;

pub struct GeminiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    fingerprint: String,
}

impl GeminiEmbedding {
    pub fn new(base_url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("gemini embedding provider requires a non-empty api key");
        }
        let base_url = base_url.trim_end_matches('/').to_string();
        let fingerprint = compute_fingerprint("gemini", &model, &base_url, &[]);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            dims: 768,
            fingerprint,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:batchEmbedContents", self.base_url, self.model)
    }

    async fn embed_batch_with_retry(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut delay_secs = 1u64;
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.send_request(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "gemini embedding request failed, retrying");
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                        delay_secs *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("gemini embedding request failed")))
    }

    async fn send_request(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let requests: Vec<GeminiEmbedRequest> = texts
            .iter()
            .map(|t| GeminiEmbedRequest {
                model: format!("models/{}", self.model),
                content: GeminiContent {
                    parts: vec![GeminiPart { text: t.clone() }],
                },
            })
            .collect();
        let body = GeminiBatchRequest { requests };
        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("gemini batchEmbedContents returned status {}", resp.status());
        }
        let parsed: GeminiBatchResponse = resp.json().await?;
        if parsed.embeddings.is_empty() {
            anyhow::bail!("gemini batchEmbedContents returned no embeddings");
        }
        parsed
            .embeddings
            .into_iter()
            .map(|e| {
                if e.values.is_empty() {
                    anyhow::bail!("gemini batchEmbedContents returned an empty vector");
                }
                Ok(e.values)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    fn id(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            out.extend(self.embed_batch_with_retry(batch).await?);
        }
        if out.len() != texts.len() {
            anyhow::bail!("gemini embeddings returned {} vectors for {} inputs", out.len(), texts.len());
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct GeminiBatchRequest {
    requests: Vec<GeminiEmbedRequest>,
}

#[derive(Serialize)]
struct GeminiEmbedRequest {
    model: String,
    content: GeminiContent,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiBatchResponse {
    embeddings: Vec<GeminiEmbeddingValues>,
}

#[derive(Deserialize)]
struct GeminiEmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_model_and_verb() {
        let provider = GeminiEmbedding::new(
            "https://generativelanguage.googleapis.com/v1beta".into(),
            "key".into(),
            "text-embedding-004".into(),
        )
        .unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:batchEmbedContents"
        );
    }

    #[test]
    fn rejects_empty_api_key() {
        assert!(GeminiEmbedding::new("https://x".into(), "".into(), "m".into()).is_err());
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let provider = GeminiEmbedding::new("https://x/".into(), "key".into(), "m".into()).unwrap();
        assert_eq!(provider.base_url, "https://x");
    }
}
