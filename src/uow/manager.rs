use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info};

use super::{
    AggregateFlushHandler, CompletionListener, OutboxListener, OutboxWriteHandler,
    PreCompleteHandler, Registration, RegistrationKey, UnitOfWork, UnitOfWorkStatus, UowError,
};
use crate::dispatch::{
    DispatchError, DispatchExecutor, DispatchQueue, OutboxDispatcher, ShutdownReport,
};
#[cfg(feature = "emitter")]
use crate::lifecycle::LifecycleNotifier;
use crate::store::{AggregateStore, MessageStorage};
use crate::transaction::{Synchronization, TransactionCoordinator, TransactionError, TransactionKey};

/// Shared handle to a live unit of work.
#[derive(Clone)]
pub struct UnitOfWorkHandle {
    unit: Arc<Mutex<UnitOfWork>>,
}

impl UnitOfWorkHandle {
    fn new(unit: UnitOfWork) -> Self {
        Self {
            unit: Arc::new(Mutex::new(unit)),
        }
    }

    pub fn with<R>(&self, read: impl FnOnce(&UnitOfWork) -> R) -> Result<R, UowError> {
        let unit = self.unit.lock().map_err(|_| UowError::LockPoisoned)?;
        Ok(read(&unit))
    }

    pub fn status(&self) -> Result<UnitOfWorkStatus, UowError> {
        self.with(UnitOfWork::status)
    }

    pub fn registrations(&self) -> Result<Vec<Registration>, UowError> {
        self.with(|unit| unit.registrations().to_vec())
    }

    fn register(&self, registration: Registration) -> Result<(), UowError> {
        self.unit
            .lock()
            .map_err(|_| UowError::LockPoisoned)?
            .register(registration)
    }

    fn deregister(&self, key: &RegistrationKey) -> Result<bool, UowError> {
        self.unit
            .lock()
            .map_err(|_| UowError::LockPoisoned)?
            .deregister(key)
    }
}

struct Inner {
    coordinator: Arc<dyn TransactionCoordinator>,
    units: Mutex<HashMap<TransactionKey, UnitOfWorkHandle>>,
    handlers: Vec<Arc<dyn PreCompleteHandler>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    executor: Mutex<Option<DispatchExecutor>>,
    queue: Option<DispatchQueue>,
}

/// Creates one unit of work per transaction and drives it through the
/// transaction's completion.
///
/// The unit is created lazily on the first registration inside a
/// transaction. A synchronization carrying the unit's handle is bound to
/// that transaction, so completion never depends on which thread commits.
#[derive(Clone)]
pub struct UnitOfWorksManager {
    inner: Arc<Inner>,
}

pub struct UnitOfWorksManagerBuilder {
    coordinator: Arc<dyn TransactionCoordinator>,
    handlers: Vec<Arc<dyn PreCompleteHandler>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    dispatcher: Option<(Arc<OutboxDispatcher>, usize)>,
    #[cfg(feature = "emitter")]
    notifier: Option<LifecycleNotifier>,
}

impl UnitOfWorksManagerBuilder {
    /// Flush registered aggregates before the commit decision.
    pub fn aggregates(self, store: Arc<dyn AggregateStore>) -> Self {
        self.handler(Arc::new(AggregateFlushHandler::new(store)))
    }

    /// Write registered messages to the outbox before the commit decision.
    pub fn outbox(self, storage: Arc<dyn MessageStorage>) -> Self {
        self.handler(Arc::new(OutboxWriteHandler::new(storage)))
    }

    pub fn handler(mut self, handler: Arc<dyn PreCompleteHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CompletionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Dispatch committed messages on a background executor whose queue
    /// holds at most `capacity` batches.
    pub fn dispatcher(mut self, dispatcher: Arc<OutboxDispatcher>, capacity: usize) -> Self {
        self.dispatcher = Some((dispatcher, capacity));
        self
    }

    #[cfg(feature = "emitter")]
    pub fn notifier(mut self, notifier: LifecycleNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(mut self) -> Result<UnitOfWorksManager, DispatchError> {
        // stable: equal ordinals keep registration order
        self.handlers.sort_by_key(|handler| handler.ordinal());

        let (executor, queue) = match self.dispatcher {
            Some((dispatcher, capacity)) => {
                let executor = DispatchExecutor::spawn(dispatcher, capacity)?;
                let queue = executor.queue();
                let listener = OutboxListener::new(queue.clone());
                #[cfg(feature = "emitter")]
                let listener = match self.notifier {
                    Some(notifier) => listener.with_notifier(notifier),
                    None => listener,
                };
                self.listeners.insert(0, Arc::new(listener));
                (Some(executor), Some(queue))
            }
            None => (None, None),
        };

        Ok(UnitOfWorksManager {
            inner: Arc::new(Inner {
                coordinator: self.coordinator,
                units: Mutex::new(HashMap::new()),
                handlers: self.handlers,
                listeners: self.listeners,
                executor: Mutex::new(executor),
                queue,
            }),
        })
    }
}

impl UnitOfWorksManager {
    pub fn builder(coordinator: Arc<dyn TransactionCoordinator>) -> UnitOfWorksManagerBuilder {
        UnitOfWorksManagerBuilder {
            coordinator,
            handlers: Vec::new(),
            listeners: Vec::new(),
            dispatcher: None,
            #[cfg(feature = "emitter")]
            notifier: None,
        }
    }

    /// Register into the unit of work of the current transaction, creating
    /// it if needed.
    pub fn register(&self, registration: Registration) -> Result<(), UowError> {
        let key = self
            .inner
            .coordinator
            .current_transaction()
            .ok_or(UowError::NoActiveTransaction)?;
        self.unit_for(&key)?.register(registration)
    }

    pub fn deregister(&self, key: &RegistrationKey) -> Result<bool, UowError> {
        match self.current_unit_of_work()? {
            Some(unit) => unit.deregister(key),
            None => Ok(false),
        }
    }

    /// The unit of work bound to the current transaction, if one exists.
    pub fn current_unit_of_work(&self) -> Result<Option<UnitOfWorkHandle>, UowError> {
        let Some(key) = self.inner.coordinator.current_transaction() else {
            return Ok(None);
        };
        let units = self.inner.units.lock().map_err(|_| UowError::LockPoisoned)?;
        Ok(units.get(&key).cloned())
    }

    /// Number of units whose transaction has not completed yet.
    pub fn active_units(&self) -> usize {
        self.inner.units.lock().map(|units| units.len()).unwrap_or(0)
    }

    pub fn dispatch_queue(&self) -> Option<DispatchQueue> {
        self.inner.queue.clone()
    }

    /// Stop the dispatch executor, waiting up to `timeout` for queued
    /// batches to drain. Later calls return `None`.
    pub fn shutdown(&self, timeout: Duration) -> Option<ShutdownReport> {
        let executor = self.inner.executor.lock().ok()?.take()?;
        let report = executor.shutdown(timeout);
        info!(
            dispatched = report.stats.dispatched,
            abandoned = report.abandoned,
            "unit of work manager shut down"
        );
        Some(report)
    }

    fn unit_for(&self, key: &TransactionKey) -> Result<UnitOfWorkHandle, UowError> {
        let mut units = self.inner.units.lock().map_err(|_| UowError::LockPoisoned)?;
        if let Some(unit) = units.get(key) {
            return Ok(unit.clone());
        }

        let unit = UnitOfWorkHandle::new(UnitOfWork::new(key.clone()));
        let synchronization = Arc::new(UnitOfWorkSynchronization {
            manager: Arc::downgrade(&self.inner),
            unit: unit.clone(),
        });
        self.inner
            .coordinator
            .register_synchronization(key, synchronization)
            .map_err(|err| UowError::Binding(err.to_string()))?;
        units.insert(key.clone(), unit.clone());
        debug!(unit = %key, "unit of work created");
        Ok(unit)
    }
}

struct UnitOfWorkSynchronization {
    manager: Weak<Inner>,
    unit: UnitOfWorkHandle,
}

impl Synchronization for UnitOfWorkSynchronization {
    fn before_completion(&self, _key: &TransactionKey) -> Result<(), TransactionError> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };

        // handlers see a snapshot so they can never block on the unit
        let snapshot = {
            let mut unit = self.unit.unit.lock().map_err(|_| UowError::LockPoisoned)?;
            unit.begin_completion()?;
            unit.clone()
        };

        for handler in &manager.handlers {
            handler.pre_complete(&snapshot).map_err(|err| {
                debug!(unit = %snapshot.id(), handler = handler.name(), error = %err, "pre-complete handler failed");
                err
            })?;
        }
        Ok(())
    }

    fn after_completion(&self, key: &TransactionKey, committed: bool) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if let Ok(mut units) = manager.units.lock() {
            units.remove(key);
        }

        let registrations = match self.unit.unit.lock() {
            Ok(mut unit) => unit.complete(committed),
            Err(_) => return,
        };
        for listener in &manager.listeners {
            listener.on_batch_completed(&registrations, committed);
        }
    }
}
