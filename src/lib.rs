//! Transactional unit of work with an outbox.
//!
//! Business code registers aggregate changes and messages into the unit of
//! work of its current transaction. Before the commit decision the
//! aggregates are flushed and the messages written as PENDING outbox rows
//! in the same transaction; after commit a background worker sends them to
//! a broker, flips them to DISPATCHED and starts any sagas they trigger. A
//! recovery sweep at startup resubmits rows a crash left PENDING.

pub mod aggregate;
pub mod config;
pub mod dispatch;
#[cfg(feature = "emitter")]
pub mod lifecycle;
pub mod message;
pub mod recovery;
pub mod runtime;
pub mod saga;
pub mod store;
pub mod transaction;
pub mod uow;

pub use aggregate::{AggregateId, AggregateRecord, LifecycleState};
pub use config::{ConfigError, OutboxConfig};
pub use dispatch::{
    Broker, BrokerError, DispatchError, InMemoryBroker, LogBroker, MarshallingScheme,
    OutboxDispatcher, ShutdownReport,
};
#[cfg(feature = "emitter")]
pub use lifecycle::LifecycleNotifier;
pub use message::{Destination, DispatchStatus, Message, Payload};
pub use recovery::{RecoverySweep, SweepReport};
pub use runtime::{OutboxRuntime, OutboxRuntimeBuilder};
pub use saga::{QueueSelector, Saga, SagaError, SagaManager, SagaTrigger, StoredSagaManager};
pub use store::{AggregateStore, InMemoryStore, MessageStorage, SagaStore, StoreError};
pub use transaction::{
    Transaction, TransactionCoordinator, TransactionError, TransactionKey, TransactionManager,
    TransactionMode,
};
pub use uow::{Registration, UnitOfWork, UnitOfWorksManager, UowError};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
