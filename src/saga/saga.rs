use std::any::TypeId;

use serde::{Deserialize, Serialize};

use super::SagaAttributes;
use crate::aggregate::AggregateId;
use crate::message::Message;

/// A long-running process instance created in reaction to a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: String,
    /// Queue or topic whose message started the saga.
    pub queue: String,
    /// Id of the message that started the saga.
    pub trigger_message: String,
    pub aggregate_id: Option<AggregateId>,
    pub active: bool,
    pub tracking_token: String,
    #[serde(default)]
    pub attributes: SagaAttributes,
}

impl Saga {
    /// New active saga triggered by `message` on `queue`, tracked by the
    /// message id.
    pub fn begin(queue: impl Into<String>, message: &Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            trigger_message: message.id.clone(),
            aggregate_id: message.aggregate_id.clone(),
            active: true,
            tracking_token: message.id.clone(),
            attributes: SagaAttributes::new(),
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Implementation type of a saga, used as the key of the persistability
/// cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SagaType {
    pub id: TypeId,
    pub name: &'static str,
}

impl SagaType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// Anything a saga manager hands back from `begin`.
pub trait SagaInstance: Send + 'static {
    fn saga(&self) -> &Saga;

    fn into_saga(self: Box<Self>) -> Saga;

    fn saga_type(&self) -> SagaType;
}

impl SagaInstance for Saga {
    fn saga(&self) -> &Saga {
        self
    }

    fn into_saga(self: Box<Self>) -> Saga {
        *self
    }

    fn saga_type(&self) -> SagaType {
        SagaType::of::<Saga>()
    }
}
