use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use percolate_core::traits::MatchingEngine;
use percolate_core::types::{Batch, InputDocument};

/// Collects converted documents for the open batch.
pub struct BatchAccumulator<D> {
    seq: Arc<AtomicU64>,
    batch: Batch<D>,
}

impl<D> BatchAccumulator<D> {
    /// `seq` hands out batch numbers; share it to number batches across accumulators.
    pub fn new(seq: Arc<AtomicU64>) -> Self {
        let batch = Batch::new(seq.fetch_add(1, Ordering::Relaxed));
        Self { seq, batch }
    }

    /// Converts and appends `doc`. A document the engine cannot bind is
    /// logged and dropped; the call itself never fails.
    pub fn accept<E>(&mut self, engine: &E, doc: InputDocument) -> bool
    where
        E: MatchingEngine<Doc = D>,
    {
        match engine.convert(&doc) {
            Ok(ingested) => {
                let id = ingested.id.clone();
                if self.batch.push(ingested, doc.into_fields()) {
                    tracing::debug!(batch = self.batch.seq(), doc_id = %id, "document replaced an earlier version in the same batch");
                }
                true
            }
            Err(e) => {
                tracing::warn!(batch = self.batch.seq(), error = %e, "Failed to build monitor document, dropping it");
                false
            }
        }
    }

    pub fn len(&self) -> usize { self.batch.len() }

    pub fn is_empty(&self) -> bool { self.batch.is_empty() }

    /// Hands out the finished batch and opens a fresh, empty one.
    pub fn seal(&mut self) -> Batch<D> {
        let next = Batch::new(self.seq.fetch_add(1, Ordering::Relaxed));
        std::mem::replace(&mut self.batch, next)
    }
}
