use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, error, warn};

use super::{Saga, SagaError, SagaInstance, SagaManager, SagaType};
use crate::message::Message;
use crate::store::SagaStore;
use crate::transaction::{TransactionCoordinator, TransactionManager};

/// Outcome of triggering sagas for one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TriggerReport {
    /// Ids of the sagas persisted.
    pub persisted: Vec<String>,
    /// Managers whose begin or persist failed.
    pub failed: Vec<String>,
}

/// Starts sagas for dispatched messages.
pub struct SagaTrigger {
    managers: Vec<Arc<dyn SagaManager>>,
    store: Arc<dyn SagaStore>,
    transactions: TransactionManager,
    persistable: RwLock<HashMap<TypeId, bool>>,
}

impl SagaTrigger {
    pub fn new(store: Arc<dyn SagaStore>, transactions: TransactionManager) -> Self {
        Self {
            managers: Vec::new(),
            store,
            transactions,
            persistable: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_manager(mut self, manager: Arc<dyn SagaManager>) -> Self {
        self.managers.push(manager);
        self
    }

    pub fn managers(&self) -> &[Arc<dyn SagaManager>] {
        &self.managers
    }

    fn matching<'a>(&'a self, message: &'a Message) -> impl Iterator<Item = &'a Arc<dyn SagaManager>> {
        self.managers
            .iter()
            .filter(move |manager| manager.selector().select_queue(message).is_some())
    }

    /// Begin and persist a saga with every manager selecting one of the
    /// message's destinations. Failures are isolated per manager.
    pub fn trigger(&self, message: &Message) -> TriggerReport {
        let mut report = TriggerReport::default();

        for manager in self.matching(message) {
            match manager.begin(message).and_then(|instance| self.persist(instance)) {
                Ok(saga) => {
                    debug!(
                        saga = %saga.id,
                        saga_manager = manager.name(),
                        message_id = %message.id,
                        "saga persisted"
                    );
                    report.persisted.push(saga.id);
                }
                Err(err) => {
                    error!(
                        saga_manager = manager.name(),
                        message_id = %message.id,
                        error = %err,
                        "saga trigger failed"
                    );
                    report.failed.push(manager.name().to_string());
                }
            }
        }

        report
    }

    /// Begin again for a saga that `message` already started, located by its
    /// tracking token. This is the only path that calls `begin` twice for
    /// the same message and manager.
    pub fn retrigger(&self, message: &Message, tracking_token: &str) -> Result<Vec<Saga>, SagaError> {
        let mut sagas = Vec::new();

        for manager in self.matching(message) {
            let Some(queue) = manager.selector().select_queue(message) else {
                continue;
            };
            if manager.get(queue, tracking_token)?.is_none() {
                return Err(SagaError::UnknownTrackingToken {
                    queue: queue.to_string(),
                    token: tracking_token.to_string(),
                });
            }
            let instance = manager.begin(message)?;
            sagas.push(self.persist(instance)?);
        }

        Ok(sagas)
    }

    /// Persist a saga. Joins the transaction bound to the calling thread if
    /// there is one, otherwise runs in its own.
    ///
    /// Non-persistable saga types are rejected before anything is written;
    /// an enclosing transaction is marked rollback-only.
    pub fn persist(&self, instance: Box<dyn SagaInstance>) -> Result<Saga, SagaError> {
        let saga_type = instance.saga_type();
        let current = self.transactions.current_transaction();

        if !self.is_persistable(&saga_type) {
            if let Some(key) = &current {
                if let Err(err) = self.transactions.set_rollback_only(key) {
                    warn!(transaction = %key, error = %err, "could not mark rollback-only");
                }
            }
            return Err(SagaError::NotPersistable {
                type_name: saga_type.name,
            });
        }

        let saga = instance.into_saga();
        match current {
            Some(key) => self.store.save(&key, &saga)?,
            None => self.transactions.in_transaction(|tx| {
                self.store.save(tx.key(), &saga)?;
                Ok::<_, SagaError>(())
            })?,
        }
        Ok(saga)
    }

    fn is_persistable(&self, saga_type: &SagaType) -> bool {
        if let Ok(cache) = self.persistable.read() {
            if let Some(known) = cache.get(&saga_type.id) {
                return *known;
            }
        }

        let persistable = self.store.is_persistable(saga_type);
        if let Ok(mut cache) = self.persistable.write() {
            cache.insert(saga_type.id, persistable);
        }
        persistable
    }

    /// Number of saga types whose persistability is memoized.
    pub fn cached_types(&self) -> usize {
        self.persistable.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn clear_caches(&self) {
        if let Ok(mut cache) = self.persistable.write() {
            cache.clear();
        }
    }
}
