//! In-process notifications of committed aggregate changes.
//!
//! After a unit of work commits, each registered aggregate fires
//! `"<kind>.<created|updated|removed>"` with the aggregate as JSON text.
//! Listeners run on the emitter's own threads.

use std::sync::{Arc, Mutex, MutexGuard};

use event_emitter_rs::EventEmitter;
use tracing::trace;

use crate::aggregate::{AggregateRecord, LifecycleState};

#[derive(Clone)]
pub struct LifecycleNotifier {
    emitter: Arc<Mutex<EventEmitter>>,
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self {
            emitter: Arc::new(Mutex::new(EventEmitter::new())),
        }
    }

    pub fn event_name(kind: &str, state: LifecycleState) -> String {
        format!("{}.{}", kind, state.as_str())
    }

    /// Register a listener for one aggregate kind and lifecycle state.
    /// Returns the listener id.
    pub fn on<F>(&self, kind: &str, state: LifecycleState, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.emitter().on(&Self::event_name(kind, state), listener)
    }

    pub fn notify(&self, record: &AggregateRecord, state: LifecycleState) {
        let event = Self::event_name(&record.id.kind, state);
        let payload = serde_json::json!({
            "kind": record.id.kind,
            "id": record.id.id,
            "version": record.version,
            "state": record.state,
        })
        .to_string();
        trace!(event = %event, aggregate = %record.id, "lifecycle notification");
        self.emitter().emit(&event, payload);
    }

    fn emitter(&self) -> MutexGuard<'_, EventEmitter> {
        self.emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
