//! Sagas started by dispatched messages.
//!
//! When a message is dispatched the [`SagaTrigger`] asks every registered
//! [`SagaManager`] whose [`QueueSelector`] matches one of the message's
//! destinations to `begin` a saga, then persists it transactionally.

mod attributes;
mod error;
mod manager;
mod saga;
mod trigger;

pub use attributes::{AttributeValue, SagaAttributes};
pub use error::SagaError;
pub use manager::{AttributeHook, QueueSelector, SagaManager, StoredSagaManager};
pub use saga::{Saga, SagaInstance, SagaType};
pub use trigger::{SagaTrigger, TriggerReport};
