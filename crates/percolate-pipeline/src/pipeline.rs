use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use percolate_core::config::PercolatorConfig;
use percolate_core::error::{Error, Result};
use percolate_core::traits::{MatchingEngine, QueryRegistry, ResultSink};
use percolate_core::types::{Batch, InputDocument, MatchMode};

use crate::accumulator::BatchAccumulator;
use crate::dispatcher::Dispatcher;
use crate::projector::ProjectionOptions;
use crate::stats::{PipelineStats, StatsSnapshot};

type DocOf<R> = <<R as QueryRegistry>::Engine as MatchingEngine>::Doc;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: MatchMode,
    pub workers: usize,
    pub projection: ProjectionOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { mode: MatchMode::default(), workers: 2, projection: ProjectionOptions::default() }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &PercolatorConfig) -> Self {
        Self {
            mode: config.matching.mode,
            workers: config.matching.workers,
            projection: ProjectionOptions::from_config(config),
        }
    }
}

/// Lifecycle of one batch, as it shows up in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Sealed,
    Matching,
    Dispatched,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sealed => "sealed",
            Self::Matching => "matching",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
        })
    }
}

/// Counts batches submitted but not yet finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 { self.idle.notify_all(); }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self.idle.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Leaves the in-flight set when the task ends, including by panic.
struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) { self.0.leave(); }
}

struct Shared<R: QueryRegistry> {
    registry: Arc<R>,
    dispatcher: Dispatcher,
    mode: MatchMode,
    pool: rayon::ThreadPool,
    seq: Arc<AtomicU64>,
    stats: PipelineStats,
    in_flight: InFlight,
    shut_down: AtomicBool,
}

impl<R: QueryRegistry> Shared<R> {
    fn submit(self: &Arc<Self>, batch: Batch<DocOf<R>>) {
        // enter before checking, so shutdown either waits for this batch or we see the flag
        self.in_flight.enter();
        if self.shut_down.load(Ordering::Acquire) {
            self.in_flight.leave();
            tracing::warn!(batch = batch.seq(), docs = batch.len(), "pipeline is shut down, discarding batch");
            return;
        }
        tracing::debug!(batch = batch.seq(), docs = batch.len(), state = %BatchState::Sealed, "batch submitted");
        self.stats.batch_submitted();
        let shared = Arc::clone(self);
        self.pool.spawn(move || {
            let _guard = InFlightGuard(&shared.in_flight);
            shared.process(batch);
        });
    }

    fn process(&self, batch: Batch<DocOf<R>>) {
        let seq = batch.seq();
        let start = Instant::now();
        tracing::debug!(batch = seq, docs = batch.len(), mode = %self.mode, state = %BatchState::Matching, "matching batch");
        // matching runs on this pool, so the engine's own parallelism shares the workers
        let outcomes = match self.registry.engine().match_batch(batch.documents(), self.mode) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.stats.batch_failed();
                tracing::error!(batch = seq, docs = batch.len(), elapsed_ms = start.elapsed().as_millis() as u64, error = %e, state = %BatchState::Failed, "Failed to match batch, dropping it");
                return;
            }
        };
        let report = self.dispatcher.dispatch(&batch, &outcomes, self.registry.as_ref());
        self.stats.batch_dispatched(outcomes.len(), &report);
        tracing::info!(
            batch = seq,
            docs = batch.len(),
            matches = outcomes.len(),
            delivered = report.records_delivered,
            dropped = report.records_dropped,
            failed_sinks = report.sinks_failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            state = %BatchState::Dispatched,
            "batch done"
        );
    }
}

/// Summary of a running pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub query_count: usize,
    /// Query id to query text.
    pub queries: BTreeMap<String, String>,
    pub mode: MatchMode,
    pub workers: usize,
    pub sinks: Vec<String>,
    pub stats: StatsSnapshot,
}

/// Batch match-and-dispatch pipeline over a query registry.
///
/// Documents go in through a [`BatchProcessor`]; each finished batch is
/// matched and dispatched on the worker pool while ingestion goes on.
pub struct Pipeline<R: QueryRegistry> {
    shared: Arc<Shared<R>>,
}

impl<R: QueryRegistry> Pipeline<R> {
    pub fn new(registry: Arc<R>, sinks: Vec<Arc<dyn ResultSink>>, options: PipelineOptions) -> Result<Self> {
        if options.workers == 0 {
            return Err(Error::InvalidConfig("pipeline needs at least one worker".into()));
        }
        if sinks.is_empty() {
            return Err(Error::InvalidConfig("pipeline needs at least one sink".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("percolate-worker-{i}"))
            .panic_handler(|_| tracing::error!("batch task panicked"))
            .build()
            .map_err(|e| Error::Operation(format!("Failed to build worker pool: {e}")))?;
        tracing::info!(workers = options.workers, mode = %options.mode, sinks = sinks.len(), "pipeline started");
        let shared = Shared {
            registry,
            dispatcher: Dispatcher::new(sinks, options.projection),
            mode: options.mode,
            pool,
            seq: Arc::new(AtomicU64::new(0)),
            stats: PipelineStats::default(),
            in_flight: InFlight::default(),
            shut_down: AtomicBool::new(false),
        };
        Ok(Self { shared: Arc::new(shared) })
    }

    pub fn registry(&self) -> &Arc<R> { &self.shared.registry }

    /// Opens a new ingestion front end. Each processor fills its own batches.
    pub fn processor(&self) -> BatchProcessor<R> {
        BatchProcessor {
            accumulator: BatchAccumulator::new(Arc::clone(&self.shared.seq)),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> StatsSnapshot { self.shared.stats.snapshot() }

    pub fn info(&self) -> PipelineInfo {
        PipelineInfo {
            query_count: self.shared.registry.query_count(),
            queries: self.shared.registry.list().iter().map(|q| (q.id.clone(), q.query.clone())).collect(),
            mode: self.shared.mode,
            workers: self.shared.pool.current_num_threads(),
            sinks: self.shared.dispatcher.sinks().iter().map(|s| s.name().to_string()).collect(),
            stats: self.stats(),
        }
    }

    /// Blocks until every submitted batch has been dispatched or dropped.
    pub fn flush(&self) { self.shared.in_flight.wait_idle(); }

    /// Drains in-flight batches, then shuts the sinks down. Later calls do
    /// nothing, and batches finished afterwards are discarded.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush();
        self.shared.dispatcher.shutdown();
        let stats = self.stats();
        tracing::info!(batches = stats.batches_dispatched, failed = stats.batches_failed, records = stats.records_delivered, "pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool { self.shared.shut_down.load(Ordering::Acquire) }
}

impl<R: QueryRegistry> Drop for Pipeline<R> {
    fn drop(&mut self) { self.shutdown(); }
}

/// Ingestion front end: accepts documents into the open batch and submits
/// it when the caller marks the batch boundary.
pub struct BatchProcessor<R: QueryRegistry> {
    shared: Arc<Shared<R>>,
    accumulator: BatchAccumulator<DocOf<R>>,
}

impl<R: QueryRegistry> BatchProcessor<R> {
    /// Adds a document to the open batch. Returns `false` when the document
    /// was rejected by schema binding.
    pub fn accept(&mut self, doc: InputDocument) -> bool {
        let accepted = self.accumulator.accept(self.shared.registry.engine(), doc);
        self.shared.stats.document(accepted);
        accepted
    }

    pub fn pending(&self) -> usize { self.accumulator.len() }

    /// Seals the open batch and hands it to the workers without waiting.
    /// An empty batch is not submitted.
    pub fn finish(&mut self) {
        let batch = self.accumulator.seal();
        if batch.is_empty() {
            tracing::debug!(batch = batch.seq(), "empty batch, nothing to match");
            return;
        }
        self.shared.submit(batch);
    }
}
