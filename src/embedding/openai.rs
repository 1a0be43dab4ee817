//! OpenAI-compatible embedding client: `POST {base_url}/embeddings`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::fingerprint::compute_fingerprint;

const BATCH_SIZE: usize = 50;
const MAX_RETRIES: u32 = 3;

pub struct OpenAiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    fingerprint: String,
}

impl OpenAiEmbedding {
    pub fn new(base_url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("openai embedding provider requires a non-empty api key");
        }
        let base_url = normalize_embeddings_url(&base_url);
        let fingerprint = compute_fingerprint("openai", &model, &base_url, &[]);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            dims: 1536,
            fingerprint,
        })
    }

    async fn embed_batch_with_retry(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut delay_secs = 1u64;
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.send_request(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "openai embedding request failed, retrying");
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                        delay_secs *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("openai embedding request failed")))
    }

    async fn send_request(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = OpenAiRequest {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("openai embeddings request returned status {}", resp.status());
        }
        let parsed: OpenAiResponse = resp.json().await?;
        parse_embedding_response(parsed)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn id(&self) -> &str {
        "openai"
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
            anyhow::bail!("openai embeddings returned {} vectors for {} inputs", out.len(), texts.len());
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

fn parse_embedding_response(resp: OpenAiResponse) -> anyhow::Result<Vec<Vec<f32>>> {
    if resp.data.is_empty() {
        anyhow::bail!("openai embeddings response contained no data");
    }
    resp.data
        .into_iter()
        .map(|d| {
            if d.embedding.is_empty() {
                anyhow::bail!("openai embeddings response contained an empty vector");
            }
            Ok(d.embedding)
        })
        .collect()
}

/// Normalizes a base URL into a full `/embeddings` endpoint, tolerating a
/// bare host, a `/v1` suffix, or an already-complete embeddings path.
fn normalize_embeddings_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/embeddings") {
        trimmed.to_string()
    } else if trimmed.ends_with("/v1") {
        format!("{trimmed}/embeddings")
    } else {
        format!("{trimmed}/v1/embeddings")
    }
}
