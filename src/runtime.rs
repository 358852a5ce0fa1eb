//! Wiring of the outbox engine at startup.
//!
//! ```ignore
//! let store = InMemoryStore::new();
//! let runtime = OutboxRuntime::builder(OutboxConfig::default())
//!     .store(store.clone())
//!     .broker(Arc::new(InMemoryBroker::new()))
//!     .start()?;
//!
//! let tx = runtime.begin()?;
//! runtime.register(Registration::created(record))?;
//! runtime.register(Registration::message(message))?;
//! tx.commit()?;
//!
//! let report = runtime.shutdown();
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, OutboxConfig};
use crate::dispatch::{Broker, OutboxDispatcher, ShutdownReport};
#[cfg(feature = "emitter")]
use crate::lifecycle::LifecycleNotifier;
use crate::recovery::{RecoverySweep, SweepReport};
use crate::saga::{SagaManager, SagaTrigger};
use crate::store::{AggregateStore, InMemoryStore, MessageStorage, SagaStore};
use crate::transaction::{
    Transaction, TransactionCoordinator, TransactionError, TransactionManager, TransactionMode,
    TransactionalResource,
};
use crate::uow::{CompletionListener, PreCompleteHandler, Registration, UnitOfWorksManager, UowError};

pub struct OutboxRuntimeBuilder {
    config: OutboxConfig,
    transactions: Option<TransactionManager>,
    resource: Option<Arc<dyn TransactionalResource>>,
    aggregates: Option<Arc<dyn AggregateStore>>,
    messages: Option<Arc<dyn MessageStorage>>,
    sagas: Option<Arc<dyn SagaStore>>,
    broker: Option<Arc<dyn Broker>>,
    saga_managers: Vec<Arc<dyn SagaManager>>,
    handlers: Vec<Arc<dyn PreCompleteHandler>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    #[cfg(feature = "emitter")]
    notifier: Option<LifecycleNotifier>,
}

impl OutboxRuntimeBuilder {
    /// Use one in-memory store for aggregates, outbox rows and sagas. Without
    /// an explicit coordinator, one is built over this store in the
    /// configured mode.
    pub fn store(mut self, store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        self.resource = Some(store.clone());
        self.aggregates = Some(store.clone());
        self.messages = Some(store.clone());
        self.sagas = Some(store);
        self
    }

    pub fn transactions(mut self, transactions: TransactionManager) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn aggregates(mut self, store: Arc<dyn AggregateStore>) -> Self {
        self.aggregates = Some(store);
        self
    }

    pub fn messages(mut self, storage: Arc<dyn MessageStorage>) -> Self {
        self.messages = Some(storage);
        self
    }

    pub fn saga_store(mut self, store: Arc<dyn SagaStore>) -> Self {
        self.sagas = Some(store);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn saga_manager(mut self, manager: Arc<dyn SagaManager>) -> Self {
        self.saga_managers.push(manager);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn PreCompleteHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CompletionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[cfg(feature = "emitter")]
    pub fn notifier(mut self, notifier: LifecycleNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validate, resolve brokers, spawn the dispatch worker and run the
    /// recovery sweep when the coordinator needs it.
    pub fn start(self) -> Result<OutboxRuntime, ConfigError> {
        let config = self.config;
        config.validate()?;

        let transactions = match (self.transactions, self.resource) {
            (Some(transactions), _) => transactions,
            (None, Some(resource)) => match config.transaction_mode {
                TransactionMode::ResourceLocal => TransactionManager::resource_local(resource),
                TransactionMode::TwoPhase => TransactionManager::two_phase(vec![resource])
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?,
            },
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "no transaction coordinator configured".into(),
                ))
            }
        };
        if transactions.mode() != config.transaction_mode {
            return Err(ConfigError::ModeMismatch {
                configured: config.transaction_mode,
                actual: transactions.mode(),
            });
        }

        let broker = self
            .broker
            .ok_or_else(|| ConfigError::Invalid("no broker configured".into()))?;
        let messages = self
            .messages
            .ok_or_else(|| ConfigError::Invalid("no message storage configured".into()))?;

        let sagas = match self.sagas {
            Some(store) => {
                let trigger = self
                    .saga_managers
                    .into_iter()
                    .fold(SagaTrigger::new(store, transactions.clone()), |trigger, manager| {
                        trigger.with_manager(manager)
                    });
                Some(Arc::new(trigger))
            }
            None if self.saga_managers.is_empty() => None,
            None => {
                return Err(ConfigError::Invalid(
                    "saga managers need a saga store".into(),
                ))
            }
        };

        let mut dispatcher = OutboxDispatcher::new(broker, messages.clone())
            .with_scheme(config.marshalling)
            .with_broker_ids(config.broker_ids.iter().cloned());
        if let Some(trigger) = &sagas {
            dispatcher = dispatcher.with_sagas(Arc::clone(trigger));
        }
        dispatcher
            .prepare()
            .map_err(|err| ConfigError::BrokerUnavailable {
                broker: err.broker_id().unwrap_or("unknown").to_string(),
                reason: err.to_string(),
            })?;
        let dispatcher = Arc::new(dispatcher);

        let mut manager = UnitOfWorksManager::builder(Arc::new(transactions.clone()));
        if let Some(aggregates) = self.aggregates {
            manager = manager.aggregates(aggregates);
        }
        manager = manager.outbox(messages.clone());
        for handler in self.handlers {
            manager = manager.handler(handler);
        }
        for listener in self.listeners {
            manager = manager.listener(listener);
        }
        #[cfg(feature = "emitter")]
        if let Some(notifier) = self.notifier {
            manager = manager.notifier(notifier);
        }
        let manager = manager
            .dispatcher(Arc::clone(&dispatcher), config.queue_capacity)
            .build()?;

        let sweep = match manager.dispatch_queue() {
            Some(queue) if RecoverySweep::required(&transactions) => {
                Some(RecoverySweep::new(messages, queue).run()?)
            }
            _ => {
                info!(mode = %transactions.mode(), "recovery sweep skipped");
                None
            }
        };

        info!(
            mode = %config.transaction_mode,
            marshalling = config.marshalling.as_str(),
            queue_capacity = config.queue_capacity,
            "outbox runtime started"
        );
        Ok(OutboxRuntime {
            config,
            transactions,
            manager,
            dispatcher,
            sagas,
            sweep,
        })
    }
}

/// A started outbox engine: unit-of-work manager, dispatch worker and saga
/// trigger sharing one configuration.
pub struct OutboxRuntime {
    config: OutboxConfig,
    transactions: TransactionManager,
    manager: UnitOfWorksManager,
    dispatcher: Arc<OutboxDispatcher>,
    sagas: Option<Arc<SagaTrigger>>,
    sweep: Option<SweepReport>,
}

impl OutboxRuntime {
    pub fn builder(config: OutboxConfig) -> OutboxRuntimeBuilder {
        OutboxRuntimeBuilder {
            config,
            transactions: None,
            resource: None,
            aggregates: None,
            messages: None,
            sagas: None,
            broker: None,
            saga_managers: Vec::new(),
            handlers: Vec::new(),
            listeners: Vec::new(),
            #[cfg(feature = "emitter")]
            notifier: None,
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn manager(&self) -> &UnitOfWorksManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<OutboxDispatcher> {
        &self.dispatcher
    }

    pub fn saga_trigger(&self) -> Option<&Arc<SagaTrigger>> {
        self.sagas.as_ref()
    }

    /// Outcome of the startup sweep, `None` when it was skipped.
    pub fn sweep_report(&self) -> Option<&SweepReport> {
        self.sweep.as_ref()
    }

    pub fn begin(&self) -> Result<Transaction, TransactionError> {
        self.transactions.begin()
    }

    pub fn register(&self, registration: Registration) -> Result<(), UowError> {
        self.manager.register(registration)
    }

    /// Drain the dispatch worker within the termination timeout and clear
    /// the saga caches.
    pub fn shutdown(self) -> ShutdownReport {
        let report = self
            .manager
            .shutdown(self.config.termination_timeout())
            .unwrap_or_default();
        if let Some(sagas) = &self.sagas {
            sagas.clear_caches();
        }
        info!(
            dispatched = report.stats.dispatched,
            abandoned = report.abandoned,
            "outbox runtime stopped"
        );
        report
    }
}
