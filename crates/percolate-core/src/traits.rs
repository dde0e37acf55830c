use std::sync::Arc;

use crate::error::Result;
use crate::record::{FieldList, SinkPayload};
use crate::types::{IngestedDocument, InputDocument, MatchMode, MatchOutcome, Meta, StandingQuery};

/// Evaluates the registered standing queries against a batch of documents.
pub trait MatchingEngine: Send + Sync {
    /// Engine-specific analyzed form of a document.
    type Doc: Send + Sync + 'static;

    /// Binds an input document to the engine schema. Fails for malformed
    /// documents; such a failure concerns this document only.
    fn convert(&self, doc: &InputDocument) -> Result<IngestedDocument<Self::Doc>>;

    /// Runs every registered query over `docs`. An `Err` means the whole batch
    /// could not be matched.
    fn match_batch(&self, docs: &[IngestedDocument<Self::Doc>], mode: MatchMode) -> Result<Vec<MatchOutcome>>;
}

/// Read side of the query store the pipeline is built over.
pub trait QueryRegistry: Send + Sync + 'static {
    type Engine: MatchingEngine;

    fn engine(&self) -> &Self::Engine;
    fn query_count(&self) -> usize;
    fn lookup(&self, query_id: &str) -> Option<Arc<StandingQuery>>;
    /// Every registered query, ordered by id.
    fn list(&self) -> Vec<Arc<StandingQuery>>;
}

/// A destination for grouped match results.
///
/// One instance serves every batch, possibly from several worker threads at
/// once, so implementations synchronize internally.
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;
    fn field_list(&self) -> &FieldList;
    fn deliver(&self, payload: &SinkPayload) -> Result<()>;
    /// Releases sink resources. Calling it more than once is a no-op.
    fn shutdown(&self) -> Result<()>;
}

/// Loads standing queries from some origin.
pub trait QueryReader: Send + Sync {
    fn read_all(&self, metadata: &Meta) -> Result<Vec<StandingQuery>>;
    fn read_by_id(&self, query_id: &str, metadata: &Meta) -> Result<StandingQuery>;
}
