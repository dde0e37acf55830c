use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running pipeline counters. Updated from worker threads.
#[derive(Debug, Default)]
pub struct PipelineStats {
    documents_accepted: AtomicU64,
    documents_rejected: AtomicU64,
    batches_submitted: AtomicU64,
    batches_dispatched: AtomicU64,
    batches_failed: AtomicU64,
    matches: AtomicU64,
    records_delivered: AtomicU64,
    records_dropped: AtomicU64,
    sink_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub documents_accepted: u64,
    pub documents_rejected: u64,
    pub batches_submitted: u64,
    pub batches_dispatched: u64,
    pub batches_failed: u64,
    pub matches: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    pub sink_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64) { counter.fetch_add(by, Ordering::Relaxed); }

impl PipelineStats {
    pub(crate) fn document(&self, accepted: bool) {
        bump(if accepted { &self.documents_accepted } else { &self.documents_rejected }, 1);
    }

    pub(crate) fn batch_submitted(&self) { bump(&self.batches_submitted, 1); }

    pub(crate) fn batch_failed(&self) { bump(&self.batches_failed, 1); }

    pub(crate) fn batch_dispatched(&self, matches: usize, report: &crate::dispatcher::DispatchReport) {
        bump(&self.batches_dispatched, 1);
        bump(&self.matches, matches as u64);
        bump(&self.records_delivered, report.records_delivered as u64);
        bump(&self.records_dropped, report.records_dropped as u64);
        bump(&self.sink_failures, report.sinks_failed as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            documents_accepted: get(&self.documents_accepted),
            documents_rejected: get(&self.documents_rejected),
            batches_submitted: get(&self.batches_submitted),
            batches_dispatched: get(&self.batches_dispatched),
            batches_failed: get(&self.batches_failed),
            matches: get(&self.matches),
            records_delivered: get(&self.records_delivered),
            records_dropped: get(&self.records_dropped),
            sink_failures: get(&self.sink_failures),
        }
    }
}
