use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker {0} is not known")]
    UnknownBroker(String),
    #[error("broker {broker} unreachable: {reason}")]
    Unreachable { broker: String, reason: String },
    #[error("destination {destination} rejected message {message_id}")]
    Rejected {
        destination: String,
        message_id: String,
    },
    #[error("could not marshal message {message_id}: {reason}")]
    Marshal { message_id: String, reason: String },
    #[error("broker lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatch queue is full ({capacity} batches)")]
    QueueFull { capacity: usize },
    #[error("dispatch executor is shut down")]
    ShutDown,
    #[error("could not start dispatch executor: {0}")]
    Spawn(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    /// The broker the failure concerns, when known.
    pub fn broker_id(&self) -> Option<&str> {
        match self {
            BrokerError::UnknownBroker(broker) | BrokerError::Unreachable { broker, .. } => {
                Some(broker)
            }
            _ => None,
        }
    }
}
