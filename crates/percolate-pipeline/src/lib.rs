//! percolate-pipeline
//!
//! Batches incoming documents, matches each batch against the registered
//! standing queries on a worker pool and dispatches the projected results to
//! every configured sink.

pub mod accumulator;
pub mod dispatcher;
pub mod pipeline;
pub mod projector;
pub mod stats;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use pipeline::{BatchProcessor, Pipeline, PipelineInfo, PipelineOptions};
pub use projector::{project, ProjectionOptions};
pub use stats::StatsSnapshot;
