//! percolate-text
//!
//! Tantivy-backed query registry and batch matcher. Standing queries are
//! parsed once against the configured schema; each batch of documents is
//! indexed in RAM and every registered query is evaluated against it.

pub mod binding;
pub mod matcher;
pub mod monitor;
pub mod tantivy_utils;

pub use binding::SchemaBinding;
pub use monitor::QueryMonitor;
