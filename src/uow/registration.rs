use crate::aggregate::{AggregateId, AggregateRecord, LifecycleState};
use crate::message::Message;
use crate::store::AggregateWrite;

/// Something registered into a unit of work.
#[derive(Clone, Debug, PartialEq)]
pub enum Registration {
    Aggregate {
        record: AggregateRecord,
        state: LifecycleState,
    },
    Message(Message),
    /// Arbitrary named signal for post-complete listeners.
    Named {
        key: String,
        value: serde_json::Value,
    },
}

/// Identifies a registration for `deregister`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegistrationKey {
    Aggregate(AggregateId),
    Message(String),
    Named(String),
}

impl Registration {
    pub fn created(record: AggregateRecord) -> Self {
        Registration::Aggregate {
            record,
            state: LifecycleState::Created,
        }
    }

    pub fn updated(record: AggregateRecord) -> Self {
        Registration::Aggregate {
            record,
            state: LifecycleState::Updated,
        }
    }

    pub fn removed(record: AggregateRecord) -> Self {
        Registration::Aggregate {
            record,
            state: LifecycleState::Removed,
        }
    }

    pub fn message(message: Message) -> Self {
        Registration::Message(message)
    }

    pub fn named(key: impl Into<String>, value: serde_json::Value) -> Self {
        Registration::Named {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> RegistrationKey {
        match self {
            Registration::Aggregate { record, .. } => RegistrationKey::Aggregate(record.id.clone()),
            Registration::Message(message) => RegistrationKey::Message(message.id.clone()),
            Registration::Named { key, .. } => RegistrationKey::Named(key.clone()),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Registration::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_aggregate_write(&self) -> Option<AggregateWrite> {
        match self {
            Registration::Aggregate { record, state } => Some(AggregateWrite {
                record: record.clone(),
                state: *state,
            }),
            _ => None,
        }
    }
}
