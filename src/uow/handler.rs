use std::sync::Arc;

use tracing::{debug, warn};

use super::{Registration, UnitOfWork};
use crate::dispatch::DispatchQueue;
#[cfg(feature = "emitter")]
use crate::lifecycle::LifecycleNotifier;
use crate::message::Message;
use crate::store::{AggregateStore, MessageStorage};
use crate::transaction::TransactionError;

pub const FLUSH_ORDINAL: i32 = 0;
pub const OUTBOX_ORDINAL: i32 = 100;

/// Runs before the commit decision, in ascending ordinal order.
///
/// Writes staged with `unit.id()` commit or roll back with the business
/// writes. An error vetoes the commit.
pub trait PreCompleteHandler: Send + Sync {
    fn ordinal(&self) -> i32;

    fn name(&self) -> &str;

    fn pre_complete(&self, unit: &UnitOfWork) -> Result<(), TransactionError>;
}

/// Runs after the outcome is known.
pub trait CompletionListener: Send + Sync {
    fn on_completed(&self, registration: &Registration, success: bool);

    fn on_batch_completed(&self, registrations: &[Registration], success: bool) {
        for registration in registrations {
            self.on_completed(registration, success);
        }
    }
}

/// Flushes registered aggregates so constraint violations abort the commit.
pub struct AggregateFlushHandler {
    store: Arc<dyn AggregateStore>,
}

impl AggregateFlushHandler {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }
}

impl PreCompleteHandler for AggregateFlushHandler {
    fn ordinal(&self) -> i32 {
        FLUSH_ORDINAL
    }

    fn name(&self) -> &str {
        "aggregate-flush"
    }

    fn pre_complete(&self, unit: &UnitOfWork) -> Result<(), TransactionError> {
        let writes = unit.aggregate_writes();
        if writes.is_empty() {
            return Ok(());
        }
        self.store.flush(unit.id(), &writes)?;
        Ok(())
    }
}

/// Persists registered messages as PENDING outbox rows.
pub struct OutboxWriteHandler {
    storage: Arc<dyn MessageStorage>,
}

impl OutboxWriteHandler {
    pub fn new(storage: Arc<dyn MessageStorage>) -> Self {
        Self { storage }
    }
}

impl PreCompleteHandler for OutboxWriteHandler {
    fn ordinal(&self) -> i32 {
        OUTBOX_ORDINAL
    }

    fn name(&self) -> &str {
        "outbox-write"
    }

    fn pre_complete(&self, unit: &UnitOfWork) -> Result<(), TransactionError> {
        let messages: Vec<Message> = unit.messages().cloned().collect();
        if messages.is_empty() {
            return Ok(());
        }
        self.storage.append(unit.id(), &messages)?;
        debug!(unit = %unit.id(), count = messages.len(), "outbox rows staged");
        Ok(())
    }
}

/// Hands committed message batches to the dispatch queue and fans out
/// aggregate lifecycle notifications.
pub struct OutboxListener {
    queue: DispatchQueue,
    #[cfg(feature = "emitter")]
    notifier: Option<LifecycleNotifier>,
}

impl OutboxListener {
    pub fn new(queue: DispatchQueue) -> Self {
        Self {
            queue,
            #[cfg(feature = "emitter")]
            notifier: None,
        }
    }

    #[cfg(feature = "emitter")]
    pub fn with_notifier(mut self, notifier: LifecycleNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn submit(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        // rows stay PENDING; the recovery sweep picks them up
        if let Err(err) = self.queue.submit(batch) {
            warn!(count, error = %err, "could not queue committed messages");
        }
    }
}

impl CompletionListener for OutboxListener {
    fn on_completed(&self, registration: &Registration, success: bool) {
        self.on_batch_completed(std::slice::from_ref(registration), success);
    }

    fn on_batch_completed(&self, registrations: &[Registration], success: bool) {
        if !success {
            return;
        }

        let batch = registrations
            .iter()
            .filter_map(Registration::as_message)
            .cloned()
            .collect();
        self.submit(batch);

        #[cfg(feature = "emitter")]
        if let Some(notifier) = &self.notifier {
            for registration in registrations {
                if let Registration::Aggregate { record, state } = registration {
                    notifier.notify(record, *state);
                }
            }
        }
    }
}
