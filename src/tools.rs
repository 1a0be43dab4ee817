//! Tool-surface operations: `memory_search`, `memory_recall`, `memory_get`,
//! `actor_lookup`. Every operation absorbs its own errors into a JSON
//! result envelope instead of propagating them — callers driving an agent
//! tool loop get a structured failure back, never a panic or a bubbled
//! `Result::Err`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::actors::ActorDirectory;
use crate::config::Citations;
use crate::embedding::{EmbeddingProvider, ProviderStatus};
use crate::error::MemoryError;
use crate::recency::resolve_recency_window;
use crate::retriever::{Retriever, SearchHit, SearchMode, SearchRequest};
use crate::scope::{resolve_scope, scope_to_filter, ChatType, ScopeContext, ScopeOverrides};

const DEFAULT_RESULT_CHAR_BUDGET: usize = 8_000;

pub struct ToolSurface {
    retriever: Arc<Retriever>,
    actors: Arc<ActorDirectory>,
    embedder: Arc<dyn EmbeddingProvider>,
    provider_status: ProviderStatus,
    /// Mirrors `store.vector.enabled`; when false the vector-backed search
    /// tools report themselves disabled rather than degrading silently.
    vector_enabled: bool,
    workspace: PathBuf,
    extra_paths: Vec<PathBuf>,
    citations: Citations,
    result_char_budget: usize,
}

#[derive(Debug, Clone, Serialize)]
struct SearchHitOut {
    #[serde(flatten)]
    hit: SearchHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    citation: Option<String>,
}

impl ToolSurface {
    pub fn new(
        retriever: Arc<Retriever>,
        actors: Arc<ActorDirectory>,
        embedder: Arc<dyn EmbeddingProvider>,
        provider_status: ProviderStatus,
        vector_enabled: bool,
        workspace: PathBuf,
        extra_paths: Vec<PathBuf>,
        citations: Citations,
    ) -> Self {
        Self {
            retriever,
            actors,
            embedder,
            provider_status,
            vector_enabled,
            workspace,
            extra_paths,
            citations,
            result_char_budget: DEFAULT_RESULT_CHAR_BUDGET,
        }
    }

    pub async fn memory_search(
        &self,
        query: &str,
        ctx: &ScopeContext,
        overrides: &ScopeOverrides,
        max_results: usize,
        cancellation_token: CancellationToken,
    ) -> Value {
        self.run_search(query, ctx, overrides, max_results, SearchMode::Hybrid, None, None, cancellation_token)
            .await
    }

    pub async fn memory_recall(
        &self,
        query: &str,
        ctx: &ScopeContext,
        overrides: &ScopeOverrides,
        max_results: usize,
        time_window_hours: Option<i64>,
        cancellation_token: CancellationToken,
    ) -> Value {
        let updated_after = time_window_hours.map(|h| Utc::now() - Duration::hours(h));
        self.run_search(query, ctx, overrides, max_results, SearchMode::Hybrid, updated_after, None, cancellation_token)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_search(
        &self,
        query: &str,
        ctx: &ScopeContext,
        overrides: &ScopeOverrides,
        max_results: usize,
        mode: SearchMode,
        updated_after: Option<chrono::DateTime<Utc>>,
        updated_before: Option<chrono::DateTime<Utc>>,
        cancellation_token: CancellationToken,
    ) -> Value {
        if cancellation_token.is_cancelled() {
            return disabled_envelope("results", json!([]), None);
        }
        if !self.vector_enabled {
            return envelope_for_error("results", json!([]), &MemoryError::Unavailable("vector store is disabled".into()));
        }
        if query.trim().is_empty() {
            return envelope_for_error("results", json!([]), &MemoryError::Validation("query must not be empty".into()));
        }

        let resolved = resolve_scope(ctx, query, overrides);
        let filters = scope_to_filter(&resolved, ctx.session_key.as_deref(), overrides);

        let req = SearchRequest {
            query: query.to_string(),
            mode,
            max_results,
            min_score: 0.0,
            filters,
            updated_after,
            updated_before,
        };

        let outcome = tokio::select! {
            () = cancellation_token.cancelled() => return cancelled_envelope(),
            outcome = self.retriever.search(&req) => outcome,
        };

        match outcome {
            Ok(hits) => {
                let (decorated, with_citations) = self.decorate(hits, ctx);
                let clamped = clamp_to_char_budget(decorated, self.result_char_budget);
                success_envelope("results", json!(clamped), Some(self.provider_metadata(with_citations)))
            }
            Err(err) => envelope_for_error("results", json!([]), &MemoryError::StoreFailure(err.to_string())),
        }
    }

    fn provider_metadata(&self, with_citations: bool) -> Value {
        let mut extra = Map::new();
        extra.insert("provider".into(), json!(self.embedder.id()));
        extra.insert("model".into(), json!(self.embedder.model()));
        extra.insert("citations".into(), json!(with_citations));
        if let Some(from) = &self.provider_status.fallback_from {
            extra.insert(
                "fallback".into(),
                json!({ "from": from, "reason": self.provider_status.fallback_reason }),
            );
        }
        Value::Object(extra)
    }

    /// Decorates hits with citations when enabled, appending the formatted
    /// `path#Lstart[-Lend]` citation line onto each snippet in addition to
    /// setting the separate `citation` field. Returns whether citations
    /// were applied so the caller can surface it at the envelope level.
    fn decorate(&self, hits: Vec<SearchHit>, ctx: &ScopeContext) -> (Vec<SearchHitOut>, bool) {
        let with_citations = match self.citations {
            Citations::Off => false,
            Citations::On => true,
            Citations::Auto => ctx.chat_type == Some(ChatType::Direct),
        };
        let decorated = hits
            .into_iter()
            .map(|mut hit| {
                let citation = with_citations.then(|| {
                    let citation = citation_for(&hit);
                    hit.snippet = format!("{}\n{citation}", hit.snippet);
                    citation
                });
                SearchHitOut { hit, citation }
            })
            .collect();
        (decorated, with_citations)
    }

    pub async fn memory_get(
        &self,
        path: &str,
        from: Option<usize>,
        lines: Option<usize>,
        cancellation_token: CancellationToken,
    ) -> Value {
        if cancellation_token.is_cancelled() {
            return disabled_envelope("text", json!(""), None);
        }
        let read = tokio::select! {
            () = cancellation_token.cancelled() => return cancelled_envelope(),
            read = self.read_validated(path) => read,
        };
        match read {
            Ok(content) => {
                let text = slice_lines(&content, from, lines);
                success_envelope("text", json!(text), Some(json!({ "path": path })))
            }
            Err(err) => envelope_for_error("text", json!(""), &err),
        }
    }

    async fn read_validated(&self, path: &str) -> Result<String, MemoryError> {
        if !path.ends_with(".md") {
            return Err(MemoryError::ScopedDenial(format!("{path} is not a markdown file")));
        }

        let candidate = self.workspace.join(path);
        let metadata = tokio::fs::symlink_metadata(&candidate)
            .await
            .map_err(|e| MemoryError::ScopedDenial(format!("{path}: {e}")))?;
        if metadata.is_symlink() {
            return Err(MemoryError::ScopedDenial(format!("{path} is a symlink")));
        }

        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| MemoryError::ScopedDenial(format!("{path}: {e}")))?;
        let allowed_roots = std::iter::once(self.workspace.as_path()).chain(self.extra_paths.iter().map(PathBuf::as_path));
        if !allowed_roots.into_iter().any(|root| canonical.starts_with(root)) {
            return Err(MemoryError::ScopedDenial(format!("{path} escapes the configured workspace")));
        }

        tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| MemoryError::ScopedDenial(format!("{path}: {e}")))
    }

    pub async fn actor_lookup(&self, query: &str, limit: usize, cancellation_token: CancellationToken) -> Value {
        if cancellation_token.is_cancelled() {
            return disabled_envelope("actors", json!([]), None);
        }
        if query.trim().is_empty() {
            return envelope_for_error("actors", json!([]), &MemoryError::Validation("query must not be empty".into()));
        }
        let outcome = tokio::select! {
            () = cancellation_token.cancelled() => return cancelled_envelope(),
            outcome = self.actors.lookup(query, limit) => outcome,
        };
        match outcome {
            Ok(rows) => success_envelope("actors", json!(rows), None),
            Err(err) => envelope_for_error("actors", json!([]), &MemoryError::StoreFailure(err.to_string())),
        }
    }

    /// Convenience used by callers that already know the ambient memory
    /// file paths open in the conversation and want the recency-derived
    /// window folded into a recall request.
    pub fn recency_window_from_paths(&self, paths: &[String]) -> (Option<chrono::DateTime<Utc>>, Option<chrono::DateTime<Utc>>) {
        let window = resolve_recency_window(paths, Utc::now());
        (window.updated_after, window.updated_before)
    }
}

fn citation_for(hit: &SearchHit) -> String {
    if hit.start_line == hit.end_line {
        format!("{}#L{}", hit.path, hit.start_line)
    } else {
        format!("{}#L{}-L{}", hit.path, hit.start_line, hit.end_line)
    }
}

/// Slices `content` to the 1-based `from` line and `lines` count, matching
/// `memory_get{path, from?, lines?}`. With both absent, returns the whole
/// file unchanged.
fn slice_lines(content: &str, from: Option<usize>, lines: Option<usize>) -> String {
    if from.is_none() && lines.is_none() {
        return content.to_string();
    }
    let all_lines: Vec<&str> = content.split('\n').collect();
    let start = from.unwrap_or(1).max(1) - 1;
    if start >= all_lines.len() {
        return String::new();
    }
    let end = match lines {
        Some(n) => (start + n).min(all_lines.len()),
        None => all_lines.len(),
    };
    all_lines[start..end].join("\n")
}

fn clamp_to_char_budget(hits: Vec<SearchHitOut>, budget: usize) -> Vec<SearchHitOut> {
    let mut out = Vec::new();
    let mut used = 0usize;
    for hit in hits {
        let cost = hit.hit.snippet.chars().count();
        if !out.is_empty() && used + cost > budget {
            break;
        }
        used += cost;
        out.push(hit);
    }
    out
}

/// Builds `{ <key>: data, ...extra }` — the success shape of the
/// documented envelope (`results`/`actors`/`text` plus optional
/// `provider`/`model`/`fallback`/`citations`/`path`).
fn success_envelope(key: &str, data: Value, extra: Option<Value>) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), data);
    if let Some(Value::Object(fields)) = extra {
        obj.extend(fields);
    }
    Value::Object(obj)
}

/// `disabled: true` envelope: the construction-unavailable and pre-dispatch
/// abort cases, which still carry the operation's empty result key.
fn disabled_envelope(key: &str, empty: Value, message: Option<&str>) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), empty);
    obj.insert("disabled".to_string(), json!(true));
    if let Some(message) = message {
        obj.insert("error".to_string(), json!(message));
    }
    Value::Object(obj)
}

/// The plain `{ <key>: empty, error: message }` shape used for validation
/// and store-failure errors that aren't a disablement.
fn error_envelope(key: &str, empty: Value, message: &str) -> Value {
    json!({ key: empty, "error": message })
}

/// The empty error envelope a mid-query cancellation propagates as.
fn cancelled_envelope() -> Value {
    json!({ "error": "" })
}

fn envelope_for_error(key: &str, empty: Value, err: &MemoryError) -> Value {
    match err {
        MemoryError::Unavailable(message) => disabled_envelope(key, empty, Some(message)),
        MemoryError::ScopedDenial(message) => disabled_envelope(key, empty, Some(message)),
        MemoryError::Cancelled => cancelled_envelope(),
        MemoryError::ProviderFailure(message) | MemoryError::StoreFailure(message) | MemoryError::Validation(message) => {
            error_envelope(key, empty, message)
        }
    }
}
