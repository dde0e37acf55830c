use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use percolate_core::error::{Error, Result};
use percolate_core::record::SinkPayload;
use percolate_core::traits::{QueryRegistry, ResultSink};
use percolate_core::types::{Batch, MatchOutcome, StandingQuery};

use crate::projector::{project, ProjectionOptions};

/// What one batch's dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records handed to sinks that accepted them, summed over sinks.
    pub records_delivered: usize,
    /// Records lost because their query or document disappeared, summed over sinks.
    pub records_dropped: usize,
    pub sinks_delivered: usize,
    pub sinks_failed: usize,
}

/// Projects match outcomes per sink and delivers the grouped payloads.
pub struct Dispatcher {
    sinks: Vec<Arc<dyn ResultSink>>,
    options: ProjectionOptions,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>, options: ProjectionOptions) -> Self { Self { sinks, options } }

    pub fn sinks(&self) -> &[Arc<dyn ResultSink>] { &self.sinks }

    /// Builds the payload for `sink`. Returns it with the number of outcomes
    /// that could not be projected.
    pub fn payload_for<D, R: QueryRegistry>(
        &self,
        sink: &dyn ResultSink,
        batch: &Batch<D>,
        outcomes: &[MatchOutcome],
        queries: &mut QueryCache<'_, R>,
    ) -> (SinkPayload, usize) {
        let mut payload = SinkPayload::new();
        let mut dropped = 0;
        for outcome in outcomes {
            let Some(query) = queries.get(&outcome.query_id) else {
                tracing::error!(batch = batch.seq(), query_id = %outcome.query_id, doc_id = %outcome.doc_id, sink = sink.name(), "query removed before dispatch, dropping record");
                dropped += 1;
                continue;
            };
            let Some(original) = batch.original(&outcome.doc_id) else {
                tracing::error!(batch = batch.seq(), doc_id = %outcome.doc_id, sink = sink.name(), "matched document not in batch, dropping record");
                dropped += 1;
                continue;
            };
            payload.push(project(outcome, sink.field_list(), original, &query.query, &self.options));
        }
        (payload, dropped)
    }

    /// Delivers one payload per sink in configured order, an empty one
    /// included when nothing matched. A sink that fails or panics is logged
    /// and does not affect the others.
    pub fn dispatch<D, R: QueryRegistry>(&self, batch: &Batch<D>, outcomes: &[MatchOutcome], registry: &R) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut queries = QueryCache::new(registry);
        for sink in &self.sinks {
            let (payload, dropped) = self.payload_for(sink.as_ref(), batch, outcomes, &mut queries);
            report.records_dropped += dropped;
            let records = payload.record_count();
            match deliver(sink.as_ref(), &payload) {
                Ok(()) => {
                    tracing::info!(batch = batch.seq(), sink = sink.name(), queries = payload.len(), records, "payload delivered");
                    report.records_delivered += records;
                    report.sinks_delivered += 1;
                }
                Err(e) => {
                    tracing::error!(batch = batch.seq(), sink = sink.name(), records, error = %e, "Failed to deliver payload");
                    report.sinks_failed += 1;
                }
            }
        }
        report
    }

    /// Shuts every sink down, logging failures.
    pub fn shutdown(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.shutdown() {
                tracing::warn!(sink = sink.name(), error = %e, "sink shutdown failed");
            }
        }
    }
}

fn deliver(sink: &dyn ResultSink, payload: &SinkPayload) -> Result<()> {
    catch_unwind(AssertUnwindSafe(|| sink.deliver(payload)))
        .unwrap_or_else(|_| Err(Error::sink(sink.name(), "sink panicked during delivery")))
}

/// Query lookups for one dispatch, so every sink sees the same answer for a
/// query id even if the registry changes mid-dispatch.
pub struct QueryCache<'r, R> {
    registry: &'r R,
    seen: HashMap<String, Option<Arc<StandingQuery>>>,
}

impl<'r, R: QueryRegistry> QueryCache<'r, R> {
    pub fn new(registry: &'r R) -> Self { Self { registry, seen: HashMap::new() } }

    pub fn get(&mut self, query_id: &str) -> Option<Arc<StandingQuery>> {
        if let Some(hit) = self.seen.get(query_id) {
            return hit.clone();
        }
        let found = self.registry.lookup(query_id);
        self.seen.insert(query_id.to_string(), found.clone());
        found
    }
}
