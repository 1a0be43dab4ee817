#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod actors;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod manager;
pub mod recency;
pub mod retriever;
pub mod scope;
pub mod session;
pub mod store;
pub mod sync;
pub mod tools;

pub use error::{MemoryError, Result};
pub use manager::MemoryIndexManager;
