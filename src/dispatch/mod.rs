//! Delivery of committed outbox messages to brokers.
//!
//! Committed batches go onto a bounded FIFO served by one background
//! executor thread. For each message the [`OutboxDispatcher`] marshals the
//! payload, sends it to every destination and only then flips the outbox
//! row to DISPATCHED. Failures leave the row PENDING for the recovery sweep.

mod broker;
mod dispatcher;
mod error;
mod executor;
mod in_memory;
mod log_broker;
mod marshal;

pub use broker::{Broker, BrokerContext, BrokerDestination, BrokerMessage, BrokerPayload, Producer};
pub use dispatcher::{DispatchOutcome, DispatchReport, OutboxDispatcher};
pub use error::{BrokerError, DispatchError};
pub use executor::{DispatchExecutor, DispatchQueue, ExecutorStats, ShutdownReport};
pub use in_memory::{Delivery, InMemoryBroker, TopicSubscription};
pub use log_broker::LogBroker;
pub use marshal::MarshallingScheme;
