use crate::aggregate::{AggregateId, AggregateRecord, LifecycleState};
use crate::message::Message;
use crate::saga::{Saga, SagaType};
use crate::transaction::TransactionKey;

use super::StoreError;

/// One aggregate change to flush.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateWrite {
    pub record: AggregateRecord,
    pub state: LifecycleState,
}

/// Persistence collaborator for aggregates.
pub trait AggregateStore: Send + Sync {
    /// Stage writes in the transaction, checking constraints now so that
    /// violations surface before the commit decision.
    fn flush(&self, key: &TransactionKey, writes: &[AggregateWrite]) -> Result<(), StoreError>;

    /// Committed state of an aggregate.
    fn load(&self, id: &AggregateId) -> Result<Option<AggregateRecord>, StoreError>;
}

/// Durable, append-only outbox.
pub trait MessageStorage: Send + Sync {
    /// Stage messages as PENDING rows in the transaction.
    fn append(&self, key: &TransactionKey, messages: &[Message]) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// PENDING rows in append order.
    fn pending(&self) -> Result<Vec<Message>, StoreError>;

    /// Compare-and-set PENDING -> DISPATCHED outside any transaction.
    /// Returns false when the row was already dispatched.
    fn mark_dispatched(&self, id: &str) -> Result<bool, StoreError>;

    /// Every row in append order.
    fn messages(&self) -> Result<Vec<Message>, StoreError>;
}

/// Persistence collaborator for saga instances.
pub trait SagaStore: Send + Sync {
    /// Whether sagas of this implementation type can be stored.
    fn is_persistable(&self, saga_type: &SagaType) -> bool;

    fn save(&self, key: &TransactionKey, saga: &Saga) -> Result<(), StoreError>;

    fn find(&self, id: &str) -> Result<Option<Saga>, StoreError>;

    fn find_by_tracking_token(&self, queue: &str, token: &str)
        -> Result<Option<Saga>, StoreError>;

    fn find_by_aggregate(&self, aggregate: &AggregateId) -> Result<Vec<Saga>, StoreError>;

    fn sagas(&self) -> Result<Vec<Saga>, StoreError>;
}
