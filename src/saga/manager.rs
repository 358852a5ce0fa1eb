use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use super::{Saga, SagaAttributes, SagaError, SagaInstance};
use crate::aggregate::AggregateId;
use crate::message::Message;
use crate::store::SagaStore;
use crate::transaction::TransactionManager;

/// Which queues or topics a saga manager reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueSelector {
    Exact(String),
    Prefix(String),
    Any,
}

impl QueueSelector {
    pub fn exact(queue: impl Into<String>) -> Self {
        QueueSelector::Exact(queue.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        QueueSelector::Prefix(prefix.into())
    }

    pub fn matches(&self, queue: &str) -> bool {
        match self {
            QueueSelector::Exact(name) => name == queue,
            QueueSelector::Prefix(prefix) => queue.starts_with(prefix.as_str()),
            QueueSelector::Any => true,
        }
    }

    /// First destination of `message` this selector matches.
    pub fn select_queue<'m>(&self, message: &'m Message) -> Option<&'m str> {
        message.destination_names().find(|name| self.matches(name))
    }
}

/// Pluggable saga manager, selected by queue.
pub trait SagaManager: Send + Sync {
    fn name(&self) -> &str;

    fn selector(&self) -> &QueueSelector;

    /// Start a saga for `message`, or continue the one it already started.
    fn begin(&self, message: &Message) -> Result<Box<dyn SagaInstance>, SagaError>;

    /// End the sagas `message` concludes.
    fn end(&self, message: &Message) -> Result<(), SagaError>;

    fn get(&self, queue: &str, tracking_token: &str) -> Result<Option<Saga>, SagaError>;

    fn select(&self, aggregate: &AggregateId) -> Result<Vec<Saga>, SagaError>;
}

/// Populates the attributes of a saga started by a message.
pub type AttributeHook = Box<dyn Fn(&Message, &mut SagaAttributes) + Send + Sync>;

/// Saga manager backed by a [`SagaStore`].
pub struct StoredSagaManager {
    name: String,
    selector: QueueSelector,
    store: Arc<dyn SagaStore>,
    transactions: TransactionManager,
    attributes: Option<AttributeHook>,
}

impl StoredSagaManager {
    pub fn new(
        name: impl Into<String>,
        selector: QueueSelector,
        store: Arc<dyn SagaStore>,
        transactions: TransactionManager,
    ) -> Self {
        Self {
            name: name.into(),
            selector,
            store,
            transactions,
            attributes: None,
        }
    }

    pub fn with_attributes<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message, &mut SagaAttributes) + Send + Sync + 'static,
    {
        self.attributes = Some(Box::new(hook));
        self
    }
}

impl SagaManager for StoredSagaManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn selector(&self) -> &QueueSelector {
        &self.selector
    }

    fn begin(&self, message: &Message) -> Result<Box<dyn SagaInstance>, SagaError> {
        let queue = self.selector.select_queue(message).unwrap_or_default();

        if let Some(existing) = self.store.find_by_tracking_token(queue, &message.id)? {
            debug!(saga = %existing.id, message_id = %message.id, "continuing saga");
            return Ok(Box::new(existing));
        }

        let mut saga = Saga::begin(queue, message);
        saga.attributes.add("started_at", SystemTime::now());
        if let Some(hook) = &self.attributes {
            hook(message, &mut saga.attributes);
        }
        debug!(saga = %saga.id, message_id = %message.id, manager = %self.name, "saga begun");
        Ok(Box::new(saga))
    }

    fn end(&self, message: &Message) -> Result<(), SagaError> {
        let Some(aggregate) = &message.aggregate_id else {
            return Ok(());
        };

        let mut ended = self.select(aggregate)?;
        ended.retain(|saga| saga.active);
        if ended.is_empty() {
            return Ok(());
        }

        self.transactions.in_transaction(|tx| {
            for saga in ended.iter_mut() {
                saga.deactivate();
                saga.attributes.add("ended_by", message.id.as_str());
                self.store.save(tx.key(), saga)?;
            }
            Ok::<_, SagaError>(())
        })
    }

    fn get(&self, queue: &str, tracking_token: &str) -> Result<Option<Saga>, SagaError> {
        Ok(self.store.find_by_tracking_token(queue, tracking_token)?)
    }

    fn select(&self, aggregate: &AggregateId) -> Result<Vec<Saga>, SagaError> {
        let mut sagas = self.store.find_by_aggregate(aggregate)?;
        sagas.retain(|saga| self.selector.matches(&saga.queue));
        Ok(sagas)
    }
}
