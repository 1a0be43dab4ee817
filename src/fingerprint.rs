//! Stable fingerprint over an embedding provider's identity, used to
//! partition the embedding cache so two deployments sharing a store but
//! pointed at different embedding endpoints never collide.

use crate::chunker::content_hash;

/// Computes a stable hash over `(provider_id, model, base_url, curated
/// headers)`. Changing any input changes the fingerprint, which forces
/// cache invalidation for rows keyed by the old one.
pub fn compute_fingerprint(
    provider_id: &str,
    model: &str,
    base_url: &str,
    curated_headers: &[(&str, &str)],
) -> String {
    let mut basis = format!("{provider_id}\u{1}{model}\u{1}{base_url}");
    let mut headers: Vec<&(&str, &str)> = curated_headers.iter().collect();
    headers.sort_by_key(|(k, _)| *k);
    for (k, v) in headers {
        basis.push('\u{1}');
        basis.push_str(k);
        basis.push('=');
        basis.push_str(v);
    }
    content_hash(&basis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let a = compute_fingerprint("openai", "text-embedding-3-small", "https://api.x", &[]);
        let b = compute_fingerprint("openai", "text-embedding-3-small", "https://api.x", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_base_url_changes_fingerprint() {
        let a = compute_fingerprint("openai", "m", "https://api.x", &[]);
        let b = compute_fingerprint("openai", "m", "https://api.y", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn header_order_does_not_affect_fingerprint() {
        let a = compute_fingerprint("p", "m", "u", &[("a", "1"), ("b", "2")]);
        let b = compute_fingerprint("p", "m", "u", &[("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_model_changes_fingerprint() {
        let a = compute_fingerprint("p", "m1", "u", &[]);
        let b = compute_fingerprint("p", "m2", "u", &[]);
        assert_ne!(a, b);
    }
}
