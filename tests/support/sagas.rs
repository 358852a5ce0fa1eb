//! Saga managers that record what the trigger asks of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sourced_outbox::saga::{QueueSelector, Saga, SagaError, SagaInstance, SagaManager, SagaType};
use sourced_outbox::{AggregateId, InMemoryStore, Message, StoredSagaManager, TransactionManager};

/// Delegates to a [`StoredSagaManager`] and counts `begin` per message id.
pub struct CountingSagaManager {
    inner: StoredSagaManager,
    begins: Mutex<HashMap<String, usize>>,
}

impl CountingSagaManager {
    pub fn new(name: &str, selector: QueueSelector, store: &InMemoryStore, tm: &TransactionManager) -> Arc<Self> {
        Arc::new(Self {
            inner: StoredSagaManager::new(name, selector, Arc::new(store.clone()), tm.clone())
                .with_attributes(|message, attributes| {
                    if let Some(aggregate) = &message.aggregate_id {
                        attributes.add("order", aggregate.id.as_str());
                    }
                }),
            begins: Mutex::new(HashMap::new()),
        })
    }

    pub fn begins(&self, message_id: &str) -> usize {
        self.begins
            .lock()
            .unwrap()
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_begins(&self) -> usize {
        self.begins.lock().unwrap().values().sum()
    }
}

impl SagaManager for CountingSagaManager {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn selector(&self) -> &QueueSelector {
        self.inner.selector()
    }

    fn begin(&self, message: &Message) -> Result<Box<dyn SagaInstance>, SagaError> {
        *self
            .begins
            .lock()
            .unwrap()
            .entry(message.id.clone())
            .or_insert(0) += 1;
        self.inner.begin(message)
    }

    fn end(&self, message: &Message) -> Result<(), SagaError> {
        self.inner.end(message)
    }

    fn get(&self, queue: &str, tracking_token: &str) -> Result<Option<Saga>, SagaError> {
        self.inner.get(queue, tracking_token)
    }

    fn select(&self, aggregate: &AggregateId) -> Result<Vec<Saga>, SagaError> {
        self.inner.select(aggregate)
    }
}

/// A saga implementation the store was never told about.
pub struct AdHocSaga(pub Saga);

impl SagaInstance for AdHocSaga {
    fn saga(&self) -> &Saga {
        &self.0
    }

    fn into_saga(self: Box<Self>) -> Saga {
        self.0
    }

    fn saga_type(&self) -> SagaType {
        SagaType::of::<AdHocSaga>()
    }
}

/// Begins [`AdHocSaga`]s, which the store refuses.
pub struct AdHocSagaManager {
    selector: QueueSelector,
}

impl AdHocSagaManager {
    pub fn new(selector: QueueSelector) -> Arc<Self> {
        Arc::new(Self { selector })
    }
}

impl SagaManager for AdHocSagaManager {
    fn name(&self) -> &str {
        "ad-hoc"
    }

    fn selector(&self) -> &QueueSelector {
        &self.selector
    }

    fn begin(&self, message: &Message) -> Result<Box<dyn SagaInstance>, SagaError> {
        let queue = self.selector.select_queue(message).unwrap_or_default();
        Ok(Box::new(AdHocSaga(Saga::begin(queue, message))))
    }

    fn end(&self, _message: &Message) -> Result<(), SagaError> {
        Ok(())
    }

    fn get(&self, _queue: &str, _tracking_token: &str) -> Result<Option<Saga>, SagaError> {
        Ok(None)
    }

    fn select(&self, _aggregate: &AggregateId) -> Result<Vec<Saga>, SagaError> {
        Ok(Vec::new())
    }
}
