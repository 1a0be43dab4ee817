//! Configuration surface for the memory index, mirroring the
//! `memorySearch.*` key tree consumed by the agent's configuration loader.
//!
//! Every field carries a `#[serde(default = "...")]` so a deployment can
//! specify only the keys it cares about, matching the rest of the agent's
//! config schema.

use serde::{Deserialize, Serialize};

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_fallback() -> String {
    "local".to_string()
}
fn default_sources() -> Vec<String> {
    vec!["memory".to_string(), "sessions".to_string()]
}
fn default_chunk_tokens() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    64
}
fn default_min_score() -> f64 {
    0.0
}
fn default_max_results() -> usize {
    10
}
fn default_hybrid_enabled() -> bool {
    true
}
fn default_candidate_multiplier() -> f64 {
    4.0
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_text_weight() -> f64 {
    0.4
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_max_entries() -> usize {
    10_000
}
fn default_on_session_start() -> bool {
    true
}
fn default_on_search() -> bool {
    false
}
fn default_recent_window_messages() -> usize {
    50
}
fn default_store_driver() -> String {
    "postgres".to_string()
}
fn default_store_schema() -> String {
    "public".to_string()
}
fn default_citations() -> Citations {
    Citations::Auto
}

/// `memory.citations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Citations {
    On,
    Off,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub tokens: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens: default_chunk_tokens(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_hybrid_enabled")]
    pub enabled: bool,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: default_hybrid_enabled(),
            candidate_multiplier: default_candidate_multiplier(),
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub hybrid: HybridConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_results: default_max_results(),
            hybrid: HybridConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_on_session_start")]
    pub on_session_start: bool,
    #[serde(default = "default_on_search")]
    pub on_search: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_session_start: default_on_session_start(),
            on_search: default_on_search(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentalConfig {
    #[serde(default)]
    pub session_memory: bool,
}

impl Default for ExperimentalConfig {
    fn default() -> Self {
        Self {
            session_memory: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VectorStoreConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_store_schema")]
    pub schema: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            ssl: false,
            schema: default_store_schema(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_driver")]
    pub driver: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub vector: VectorStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: default_store_driver(),
            postgres: PostgresConfig::default(),
            vector: VectorStoreConfig::default(),
        }
    }
}

/// Top-level `memorySearch.*` configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryIndexConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub extra_paths: Vec<String>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_recent_window_messages")]
    pub recent_window_messages: usize,
    #[serde(default)]
    pub experimental: ExperimentalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_citations")]
    pub citations: Citations,
}

impl Default for MemoryIndexConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            remote: None,
            local: None,
            fallback: default_fallback(),
            sources: default_sources(),
            extra_paths: Vec::new(),
            chunking: ChunkingConfig::default(),
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            recent_window_messages: default_recent_window_messages(),
            experimental: ExperimentalConfig::default(),
            store: StoreConfig::default(),
            citations: default_citations(),
        }
    }
}
