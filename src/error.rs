//! Error taxonomy for the memory index.
//!
//! Mirrors the propagation rule from the component design: the sync loop
//! absorbs per-file errors, the tool surface absorbs all errors into its
//! result envelope, and only construction-time misconfiguration surfaces as
//! a hard `Err` to the caller.

use thiserror::Error;

/// Top-level error taxonomy. Call sites that need richer context wrap these
/// in `anyhow::Error` with `.context(...)`, matching the rest of the crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No manager could be constructed: missing provider, unreachable store.
    #[error("memory index unavailable: {0}")]
    Unavailable(String),

    /// An embedding call failed.
    #[error("embedding provider failure: {0}")]
    ProviderFailure(String),

    /// A store transaction failed.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// Bad tool input.
    #[error("validation error: {0}")]
    Validation(String),

    /// `memory_get` rejected a path outside the workspace, a non-`.md` path,
    /// or a symlink.
    #[error("path rejected: {0}")]
    ScopedDenial(String),

    /// The caller's ambient abort fired before or during the operation.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MemoryError>;
