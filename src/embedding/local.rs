//! In-process embedding provider. No network calls.
//!
//! Projects text into a fixed-size vector via hashed n-gram buckets — good
//! enough to exercise the rest of the pipeline (cache, store, hybrid fusion)
//! without a real model, and always available as the terminal fallback.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::fingerprint::compute_fingerprint;

pub struct LocalEmbedding {
    model: String,
    dims: usize,
    fingerprint: String,
}

impl LocalEmbedding {
    pub fn new(model: String, dims: usize) -> Self {
        let fingerprint = compute_fingerprint("local", &model, "local", &[]);
        Self {
            model,
            dims: dims.max(1),
            fingerprint,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0f32; self.dims];
        let normalized = text.to_lowercase();
        for token in normalized.split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize) % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        } else {
            // Non-empty input must never yield an all-zero vector.
            vec[0] = 1.0;
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    fn id(&self) -> &str {
        "local"
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
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_length_and_order() {
        let provider = LocalEmbedding::new("local".into(), 16);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let vecs = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(vecs.len(), texts.len());
        for v in &vecs {
            assert_eq!(v.len(), 16);
        }
    }

    #[tokio::test]
    async fn never_returns_zero_vector_for_nonempty_input() {
        let provider = LocalEmbedding::new("local".into(), 8);
        let vecs = provider.embed_batch(&["".to_string()]).await.unwrap();
        assert!(vecs[0].iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn identical_text_yields_identical_vector() {
        let provider = LocalEmbedding::new("local".into(), 32);
        let a = provider.embed_query("hello world").await.unwrap();
        let b = provider.embed_query("hello world").await.unwrap();
        assert_eq!(a, b);
    }
}
