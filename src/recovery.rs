//! Startup resubmission of messages left PENDING by a previous process.

use std::sync::Arc;

use tracing::{info, warn};

use crate::dispatch::{DispatchError, DispatchQueue};
use crate::store::MessageStorage;
use crate::transaction::{TransactionCoordinator, TransactionMode};

const SWEEP_BATCH: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// PENDING rows found.
    pub found: usize,
    /// Rows handed to the dispatch queue.
    pub resubmitted: usize,
}

pub struct RecoverySweep {
    storage: Arc<dyn MessageStorage>,
    queue: DispatchQueue,
}

impl RecoverySweep {
    pub fn new(storage: Arc<dyn MessageStorage>, queue: DispatchQueue) -> Self {
        Self { storage, queue }
    }

    /// Whether the sweep must run for this coordinator. Only a two-phase
    /// coordinator that recovers outbox rows itself makes it redundant.
    pub fn required(coordinator: &dyn TransactionCoordinator) -> bool {
        !(coordinator.mode() == TransactionMode::TwoPhase && coordinator.recovers_outbox())
    }

    /// Resubmit every PENDING row in append order. Stops early when the
    /// queue is full; the remaining rows wait for the next sweep.
    pub fn run(&self) -> Result<SweepReport, DispatchError> {
        let pending = self.storage.pending()?;
        let mut report = SweepReport {
            found: pending.len(),
            resubmitted: 0,
        };

        for chunk in pending.chunks(SWEEP_BATCH) {
            match self.queue.submit(chunk.to_vec()) {
                Ok(()) => report.resubmitted += chunk.len(),
                Err(DispatchError::QueueFull { capacity }) => {
                    warn!(
                        capacity,
                        left = report.found - report.resubmitted,
                        "dispatch queue full during recovery sweep"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        info!(found = report.found, resubmitted = report.resubmitted, "recovery sweep finished");
        Ok(report)
    }
}
