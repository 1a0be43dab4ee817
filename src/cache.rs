//! Read-through embedding cache: dedupe by hash, fan missing hashes out to
//! the provider, upsert the results, fan embeddings back to every chunk
//! sharing a hash.

use std::collections::HashMap;

use crate::embedding::EmbeddingProvider;
use crate::store::Store;

/// One chunk's worth of cache input: its content hash and the exact text to
/// send to the provider if the hash misses.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub hash: String,
    pub text: String,
}

/// Resolves embeddings for a batch of `(hash, text)` pairs, using the cache
/// for hashes already known and calling the provider only for the unique
/// misses.
///
/// Failure mode: if the provider returns fewer vectors than requested, or
/// any vector is empty, the whole batch fails — callers abort the
/// transaction for the current file.
pub async fn resolve_embeddings(
    store: &dyn Store,
    provider: &dyn EmbeddingProvider,
    lookups: &[CacheLookup],
) -> anyhow::Result<HashMap<String, Vec<f32>>> {
    if lookups.is_empty() {
        return Ok(HashMap::new());
    }

    let fingerprint = provider.fingerprint();
    let all_hashes: Vec<String> = lookups.iter().map(|l| l.hash.clone()).collect();
    let mut resolved = store.get_cached_embeddings(fingerprint, &all_hashes).await?;

    // Dedup missing entries by hash — several chunks may share content.
    let mut missing: Vec<&CacheLookup> = Vec::new();
    let mut seen_hashes = std::collections::HashSet::new();
    for lookup in lookups {
        if resolved.contains_key(&lookup.hash) {
            continue;
        }
        if seen_hashes.insert(lookup.hash.clone()) {
            missing.push(lookup);
        }
    }

    if missing.is_empty() {
        return Ok(resolved);
    }

    // Normalized-text dedup is a diagnostic signal only; it is never used as
    // the cache key, since two hashes with the same normalized text are
    // still distinct content and must stay separately addressable.
    let normalized_unique: std::collections::HashSet<String> =
        missing.iter().map(|l| l.text.trim().to_lowercase()).collect();
    if normalized_unique.len() < missing.len() {
        tracing::debug!(
            hash_misses = missing.len(),
            normalized_unique = normalized_unique.len(),
            "embedding cache miss batch contains near-duplicate text"
        );
    }

    let texts: Vec<String> = missing.iter().map(|l| l.text.clone()).collect();
    let vectors = provider.embed_batch(&texts).await?;
    if vectors.len() != texts.len() {
        anyhow::bail!(
            "embedding provider returned {} vectors for {} requested texts",
            vectors.len(),
            texts.len()
        );
    }
    for v in &vectors {
        if v.is_empty() {
            anyhow::bail!("embedding provider returned an empty vector");
        }
    }

    let mut new_entries = Vec::with_capacity(missing.len());
    for (lookup, vector) in missing.iter().zip(vectors.into_iter()) {
        resolved.insert(lookup.hash.clone(), vector.clone());
        new_entries.push((lookup.hash.clone(), vector));
    }

    store
        .put_cached_embeddings(provider.id(), provider.model(), fingerprint, &new_entries)
        .await?;

    Ok(resolved)
}

/// Invalidates cache rows left behind by a prior fingerprint after a sync
/// completes under the current one.
pub async fn invalidate_stale_fingerprints(
    store: &dyn Store,
    provider: &dyn EmbeddingProvider,
) -> anyhow::Result<()> {
    store
        .drop_stale_cache(provider.id(), provider.model(), provider.fingerprint())
        .await
}
