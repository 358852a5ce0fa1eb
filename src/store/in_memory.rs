use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use super::{AggregateStore, AggregateWrite, MessageStorage, SagaStore, StoreError};
use crate::aggregate::{AggregateId, AggregateRecord, LifecycleState};
use crate::message::{DispatchStatus, Message};
use crate::saga::{Saga, SagaInstance, SagaType};
use crate::transaction::{TransactionKey, TransactionalResource};

#[derive(Clone, Default)]
struct Staged {
    aggregates: Vec<AggregateWrite>,
    messages: Vec<Message>,
    sagas: Vec<Saga>,
}

#[derive(Default)]
struct Outbox {
    rows: Vec<Message>,
    index: HashMap<String, usize>,
}

/// Aggregates and message ids held by prepared transactions until they
/// commit or roll back.
#[derive(Default)]
struct Reservations {
    aggregates: HashMap<AggregateId, TransactionKey>,
    messages: HashMap<String, TransactionKey>,
}

impl Reservations {
    fn check(
        &self,
        key: &TransactionKey,
        staged: &Staged,
        committed: &HashMap<AggregateId, AggregateRecord>,
    ) -> Result<(), StoreError> {
        for write in &staged.aggregates {
            if self.aggregates.get(&write.record.id).is_some_and(|owner| owner != key) {
                return Err(StoreError::Conflict {
                    id: write.record.id.to_string(),
                    expected: write.record.version,
                    actual: committed
                        .get(&write.record.id)
                        .map(|record| record.version)
                        .unwrap_or(0),
                });
            }
        }
        for message in &staged.messages {
            if self.messages.get(&message.id).is_some_and(|owner| owner != key) {
                return Err(StoreError::DuplicateMessage(message.id.clone()));
            }
        }
        Ok(())
    }

    fn reserve(&mut self, key: &TransactionKey, staged: &Staged) {
        for write in &staged.aggregates {
            self.aggregates.insert(write.record.id.clone(), key.clone());
        }
        for message in &staged.messages {
            self.messages.insert(message.id.clone(), key.clone());
        }
    }

    fn release(&mut self, key: &TransactionKey) {
        self.aggregates.retain(|_, owner| owner != key);
        self.messages.retain(|_, owner| owner != key);
    }
}

struct Inner {
    aggregates: RwLock<HashMap<AggregateId, AggregateRecord>>,
    outbox: RwLock<Outbox>,
    sagas: RwLock<HashMap<String, Saga>>,
    staged: Mutex<HashMap<TransactionKey, Staged>>,
    reserved: Mutex<Reservations>,
    saga_types: RwLock<HashSet<TypeId>>,
}

/// Thread-safe in-memory store for aggregates, outbox rows and sagas.
///
/// Cloning creates another handle to the same storage, so a clone handed to
/// a fresh runtime behaves like the same database after a restart.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut saga_types = HashSet::new();
        saga_types.insert(TypeId::of::<Saga>());
        InMemoryStore {
            inner: Arc::new(Inner {
                aggregates: RwLock::new(HashMap::new()),
                outbox: RwLock::new(Outbox::default()),
                sagas: RwLock::new(HashMap::new()),
                staged: Mutex::new(HashMap::new()),
                reserved: Mutex::new(Reservations::default()),
                saga_types: RwLock::new(saga_types),
            }),
        }
    }

    /// Declare a saga implementation type as storable.
    pub fn register_saga_type<T: SagaInstance>(&self) -> Result<(), StoreError> {
        self.inner
            .saga_types
            .write()
            .map_err(|_| StoreError::LockPoisoned("saga types write"))?
            .insert(TypeId::of::<T>());
        Ok(())
    }

    /// Number of transactions with staged writes.
    pub fn staged_transactions(&self) -> usize {
        self.inner.staged.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn with_staged<F>(&self, key: &TransactionKey, stage: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Staged),
    {
        let mut staged = self
            .inner
            .staged
            .lock()
            .map_err(|_| StoreError::LockPoisoned("stage"))?;
        stage(staged.entry(key.clone()).or_default());
        Ok(())
    }

    fn staged_aggregate_writes(&self, key: &TransactionKey) -> Result<Vec<AggregateWrite>, StoreError> {
        let staged = self
            .inner
            .staged
            .lock()
            .map_err(|_| StoreError::LockPoisoned("stage"))?;
        Ok(staged
            .get(key)
            .map(|s| s.aggregates.clone())
            .unwrap_or_default())
    }
}

/// Check `writes` in order against `committed`, as if each were applied.
fn check_writes(
    committed: &HashMap<AggregateId, AggregateRecord>,
    writes: &[AggregateWrite],
) -> Result<(), StoreError> {
    let mut overlay: HashMap<&AggregateId, Option<u64>> = HashMap::new();

    for write in writes {
        let id = &write.record.id;
        let current = match overlay.get(id) {
            Some(version) => *version,
            None => committed.get(id).map(|record| record.version),
        };

        let next = match (write.state, current) {
            (LifecycleState::Created, None) => Some(1),
            (LifecycleState::Created, Some(actual)) => {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected: 0,
                    actual,
                })
            }
            (LifecycleState::Updated, Some(actual)) if actual == write.record.version => {
                Some(actual + 1)
            }
            (LifecycleState::Removed, Some(actual)) if actual == write.record.version => None,
            (_, actual) => {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected: write.record.version,
                    actual: actual.unwrap_or(0),
                })
            }
        };
        overlay.insert(id, next);
    }

    Ok(())
}

/// Reject message ids already in the outbox or repeated within `messages`.
fn check_messages(outbox: &Outbox, messages: &[Message]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for message in messages {
        if outbox.index.contains_key(&message.id) || !seen.insert(message.id.as_str()) {
            return Err(StoreError::DuplicateMessage(message.id.clone()));
        }
    }
    Ok(())
}

fn apply_write(committed: &mut HashMap<AggregateId, AggregateRecord>, write: AggregateWrite) {
    let AggregateWrite { mut record, state } = write;
    match state {
        LifecycleState::Removed => {
            committed.remove(&record.id);
        }
        LifecycleState::Created => {
            record.version = 1;
            committed.insert(record.id.clone(), record);
        }
        LifecycleState::Updated => {
            record.version += 1;
            committed.insert(record.id.clone(), record);
        }
    }
}

impl AggregateStore for InMemoryStore {
    fn flush(&self, key: &TransactionKey, writes: &[AggregateWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut combined = self.staged_aggregate_writes(key)?;
        combined.extend_from_slice(writes);
        {
            let committed = self
                .inner
                .aggregates
                .read()
                .map_err(|_| StoreError::LockPoisoned("aggregates read"))?;
            check_writes(&committed, &combined)?;
        }

        debug!(transaction = %key, count = writes.len(), "aggregates flushed");
        self.with_staged(key, |staged| staged.aggregates.extend_from_slice(writes))
    }

    fn load(&self, id: &AggregateId) -> Result<Option<AggregateRecord>, StoreError> {
        let aggregates = self
            .inner
            .aggregates
            .read()
            .map_err(|_| StoreError::LockPoisoned("aggregates read"))?;
        Ok(aggregates.get(id).cloned())
    }
}

impl MessageStorage for InMemoryStore {
    fn append(&self, key: &TransactionKey, messages: &[Message]) -> Result<(), StoreError> {
        self.with_staged(key, |staged| {
            for message in messages {
                let mut row = message.clone();
                row.status = DispatchStatus::Pending;
                staged.messages.push(row);
            }
        })
    }

    fn get(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let outbox = self
            .inner
            .outbox
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(outbox.index.get(id).map(|&pos| outbox.rows[pos].clone()))
    }

    fn pending(&self) -> Result<Vec<Message>, StoreError> {
        let outbox = self
            .inner
            .outbox
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(outbox
            .rows
            .iter()
            .filter(|row| row.is_pending())
            .cloned()
            .collect())
    }

    fn mark_dispatched(&self, id: &str) -> Result<bool, StoreError> {
        let mut outbox = self
            .inner
            .outbox
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let pos = *outbox
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
        Ok(outbox.rows[pos].mark_dispatched())
    }

    fn messages(&self) -> Result<Vec<Message>, StoreError> {
        let outbox = self
            .inner
            .outbox
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(outbox.rows.clone())
    }
}

impl SagaStore for InMemoryStore {
    fn is_persistable(&self, saga_type: &SagaType) -> bool {
        self.inner
            .saga_types
            .read()
            .map(|types| types.contains(&saga_type.id))
            .unwrap_or(false)
    }

    fn save(&self, key: &TransactionKey, saga: &Saga) -> Result<(), StoreError> {
        self.with_staged(key, |staged| staged.sagas.push(saga.clone()))
    }

    fn find(&self, id: &str) -> Result<Option<Saga>, StoreError> {
        let sagas = self
            .inner
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("sagas read"))?;
        Ok(sagas.get(id).cloned())
    }

    fn find_by_tracking_token(
        &self,
        queue: &str,
        token: &str,
    ) -> Result<Option<Saga>, StoreError> {
        let sagas = self
            .inner
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("sagas read"))?;
        Ok(sagas
            .values()
            .find(|saga| saga.queue == queue && saga.tracking_token == token)
            .cloned())
    }

    fn find_by_aggregate(&self, aggregate: &AggregateId) -> Result<Vec<Saga>, StoreError> {
        let sagas = self
            .inner
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("sagas read"))?;
        let mut found: Vec<Saga> = sagas
            .values()
            .filter(|saga| saga.aggregate_id.as_ref() == Some(aggregate))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn sagas(&self) -> Result<Vec<Saga>, StoreError> {
        let sagas = self
            .inner
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("sagas read"))?;
        let mut all: Vec<Saga> = sagas.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

impl TransactionalResource for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    /// Check the staged writes and reserve their aggregates and message ids,
    /// so that no other transaction can take them before this one commits.
    fn prepare(&self, key: &TransactionKey) -> Result<(), StoreError> {
        let staged = self
            .inner
            .staged
            .lock()
            .map_err(|_| StoreError::LockPoisoned("stage"))?
            .get(key)
            .cloned();
        let Some(staged) = staged else {
            return Ok(());
        };

        let aggregates = self
            .inner
            .aggregates
            .read()
            .map_err(|_| StoreError::LockPoisoned("aggregates read"))?;
        let outbox = self
            .inner
            .outbox
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        let mut reserved = self
            .inner
            .reserved
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reservations"))?;

        check_writes(&aggregates, &staged.aggregates)?;
        check_messages(&outbox, &staged.messages)?;
        reserved.check(key, &staged, &aggregates)?;
        reserved.reserve(key, &staged);
        Ok(())
    }

    fn commit(&self, key: &TransactionKey) -> Result<(), StoreError> {
        let staged = self
            .inner
            .staged
            .lock()
            .map_err(|_| StoreError::LockPoisoned("stage"))?
            .remove(key);
        let Some(staged) = staged else {
            return Ok(());
        };

        // Lock order: aggregates, outbox, sagas, reservations.
        let mut aggregates = self
            .inner
            .aggregates
            .write()
            .map_err(|_| StoreError::LockPoisoned("aggregates write"))?;
        let mut outbox = self
            .inner
            .outbox
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let mut sagas = self
            .inner
            .sagas
            .write()
            .map_err(|_| StoreError::LockPoisoned("sagas write"))?;

        let mut reserved = self
            .inner
            .reserved
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reservations"))?;

        check_writes(&aggregates, &staged.aggregates)?;
        check_messages(&outbox, &staged.messages)?;
        reserved.check(key, &staged, &aggregates)?;
        reserved.release(key);

        for write in staged.aggregates {
            apply_write(&mut aggregates, write);
        }
        for message in staged.messages {
            let pos = outbox.rows.len();
            outbox.index.insert(message.id.clone(), pos);
            outbox.rows.push(message);
        }
        for saga in staged.sagas {
            sagas.insert(saga.id.clone(), saga);
        }

        Ok(())
    }

    fn rollback(&self, key: &TransactionKey) {
        if let Ok(mut staged) = self.inner.staged.lock() {
            staged.remove(key);
        }
        if let Ok(mut reserved) = self.inner.reserved.lock() {
            reserved.release(key);
        }
    }
}
