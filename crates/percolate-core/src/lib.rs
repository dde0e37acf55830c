//! percolate-core
//!
//! Domain types, traits and configuration shared by the matching engine, the
//! match-and-dispatch pipeline and the sink implementations.

pub mod config;
pub mod error;
pub mod record;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
