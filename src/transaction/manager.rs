use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{
    Synchronization, TransactionCoordinator, TransactionError, TransactionKey, TransactionMode,
    TransactionalResource,
};

static NEXT_COORDINATOR: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Transactions bound to this thread, innermost last.
    static BOUND: RefCell<Vec<TransactionKey>> = const { RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct TransactionState {
    synchronizations: Vec<Arc<dyn Synchronization>>,
    rollback_only: bool,
}

struct Inner {
    id: u64,
    mode: TransactionMode,
    resources: Vec<Arc<dyn TransactionalResource>>,
    sequence: AtomicU64,
    active: Mutex<HashMap<TransactionKey, TransactionState>>,
}

/// Coordinates transactions over one (resource-local) or several
/// (two-phase) transactional resources.
///
/// Cloning creates another handle to the same coordinator.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

impl TransactionManager {
    /// Coordinator over a single resource.
    pub fn resource_local(resource: Arc<dyn TransactionalResource>) -> Self {
        Self::build(TransactionMode::ResourceLocal, vec![resource])
    }

    /// Coordinator that prepares every resource before committing any.
    pub fn two_phase(
        resources: Vec<Arc<dyn TransactionalResource>>,
    ) -> Result<Self, TransactionError> {
        if resources.is_empty() {
            return Err(TransactionError::Configuration(
                "two-phase coordinator needs at least one resource".into(),
            ));
        }
        Ok(Self::build(TransactionMode::TwoPhase, resources))
    }

    fn build(mode: TransactionMode, resources: Vec<Arc<dyn TransactionalResource>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_COORDINATOR.fetch_add(1, Ordering::Relaxed),
                mode,
                resources,
                sequence: AtomicU64::new(1),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Begin a transaction and bind it to the calling thread.
    pub fn begin(&self) -> Result<Transaction, TransactionError> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let key = TransactionKey::new(self.inner.id, sequence);
        self.inner
            .active
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?
            .insert(key.clone(), TransactionState::default());
        BOUND.with(|bound| bound.borrow_mut().push(key.clone()));
        debug!(transaction = %key, "transaction begun");

        Ok(Transaction {
            key,
            manager: self.clone(),
            finished: false,
            _thread_bound: PhantomData,
        })
    }

    /// Run `work` in a new transaction; commit on `Ok`, roll back on `Err`.
    pub fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let tx = self.begin()?;
        match work(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    pub fn is_active(&self, key: &TransactionKey) -> bool {
        self.inner
            .active
            .lock()
            .map(|active| active.contains_key(key))
            .unwrap_or(false)
    }

    pub fn is_rollback_only(&self, key: &TransactionKey) -> Result<bool, TransactionError> {
        let active = self
            .inner
            .active
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?;
        active
            .get(key)
            .map(|state| state.rollback_only)
            .ok_or_else(|| TransactionError::NotActive(key.clone()))
    }

    fn synchronizations(
        &self,
        key: &TransactionKey,
    ) -> Result<Vec<Arc<dyn Synchronization>>, TransactionError> {
        let active = self
            .inner
            .active
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?;
        active
            .get(key)
            .map(|state| state.synchronizations.clone())
            .ok_or_else(|| TransactionError::NotActive(key.clone()))
    }

    fn finish(&self, key: &TransactionKey, commit: bool) -> Result<(), TransactionError> {
        let synchronizations = self.synchronizations(key)?;

        let outcome = if commit {
            self.commit_resources(key, &synchronizations)
        } else {
            Err(TransactionError::RolledBack {
                key: key.clone(),
                reason: "rollback requested".into(),
            })
        };

        let committed = outcome.is_ok();
        if !committed {
            for resource in &self.inner.resources {
                resource.rollback(key);
            }
        }

        BOUND.with(|bound| bound.borrow_mut().retain(|bound_key| bound_key != key));
        if let Ok(mut active) = self.inner.active.lock() {
            active.remove(key);
        }

        for synchronization in &synchronizations {
            synchronization.after_completion(key, committed);
        }

        match outcome {
            Ok(()) => {
                debug!(transaction = %key, "transaction committed");
                Ok(())
            }
            Err(err) if commit => {
                debug!(transaction = %key, error = %err, "transaction rolled back");
                Err(err)
            }
            Err(_) => {
                debug!(transaction = %key, "transaction rolled back");
                Ok(())
            }
        }
    }

    fn commit_resources(
        &self,
        key: &TransactionKey,
        synchronizations: &[Arc<dyn Synchronization>],
    ) -> Result<(), TransactionError> {
        self.ensure_not_rollback_only(key)?;

        for synchronization in synchronizations {
            synchronization.before_completion(key)?;
        }

        // before_completion may have vetoed
        self.ensure_not_rollback_only(key)?;

        for resource in &self.inner.resources {
            resource.prepare(key)?;
        }

        for (index, resource) in self.inner.resources.iter().enumerate() {
            if let Err(err) = resource.commit(key) {
                if index > 0 {
                    warn!(
                        transaction = %key,
                        resource = resource.name(),
                        error = %err,
                        "commit failed after other resources committed"
                    );
                }
                return Err(err.into());
            }
        }

        Ok(())
    }

    fn ensure_not_rollback_only(&self, key: &TransactionKey) -> Result<(), TransactionError> {
        if self.is_rollback_only(key)? {
            return Err(TransactionError::RolledBack {
                key: key.clone(),
                reason: "marked rollback-only".into(),
            });
        }
        Ok(())
    }
}

impl TransactionCoordinator for TransactionManager {
    fn current_transaction(&self) -> Option<TransactionKey> {
        BOUND.with(|bound| {
            bound
                .borrow()
                .iter()
                .rev()
                .find(|key| key.coordinator() == self.inner.id)
                .cloned()
        })
    }

    fn register_synchronization(
        &self,
        key: &TransactionKey,
        synchronization: Arc<dyn Synchronization>,
    ) -> Result<(), TransactionError> {
        let mut active = self
            .inner
            .active
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?;
        let state = active
            .get_mut(key)
            .ok_or_else(|| TransactionError::NotActive(key.clone()))?;
        state.synchronizations.push(synchronization);
        Ok(())
    }

    fn set_rollback_only(&self, key: &TransactionKey) -> Result<(), TransactionError> {
        let mut active = self
            .inner
            .active
            .lock()
            .map_err(|_| TransactionError::LockPoisoned)?;
        let state = active
            .get_mut(key)
            .ok_or_else(|| TransactionError::NotActive(key.clone()))?;
        state.rollback_only = true;
        Ok(())
    }

    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }
}

/// An open transaction bound to the thread that began it.
///
/// Dropping it without calling [`commit`](Transaction::commit) rolls back.
pub struct Transaction {
    key: TransactionKey,
    manager: TransactionManager,
    finished: bool,
    _thread_bound: PhantomData<Rc<()>>,
}

impl Transaction {
    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn set_rollback_only(&self) -> Result<(), TransactionError> {
        self.manager.set_rollback_only(&self.key)
    }

    /// Run the completion protocol and commit. On error every resource has
    /// been rolled back and synchronizations saw `committed = false`.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        self.manager.finish(&self.key, true)
    }

    pub fn rollback(mut self) {
        self.finished = true;
        if let Err(err) = self.manager.finish(&self.key, false) {
            warn!(transaction = %self.key, error = %err, "rollback failed");
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.manager.finish(&self.key, false) {
                warn!(transaction = %self.key, error = %err, "rollback on drop failed");
            }
        }
    }
}
