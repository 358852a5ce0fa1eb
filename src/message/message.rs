use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{Destination, Payload};
use crate::aggregate::{AggregateId, AggregateRecord, LifecycleState};

/// Dispatch status of a stored message. Only ever moves Pending -> Dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStatus {
    #[default]
    Pending,
    Dispatched,
}

/// A domain message registered in a unit of work and written to the outbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Aggregate whose change produced this message.
    pub aggregate_id: Option<AggregateId>,
    pub destinations: Vec<Destination>,
    pub payload: Payload,
    pub created_at: SystemTime,
    pub status: DispatchStatus,
    /// Messages sharing a merge key and destinations collapse into one within
    /// a unit of work; the later one wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_key: Option<String>,
    /// Sent as broker headers alongside the payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Create a pending message with a generated id.
    pub fn new(payload: Payload) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payload)
    }

    /// Create a pending message with an explicit id.
    pub fn with_id(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            aggregate_id: None,
            destinations: Vec::new(),
            payload,
            created_at: SystemTime::now(),
            status: DispatchStatus::Pending,
            merge_key: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Lifecycle notice for an aggregate, carrying the aggregate state as a
    /// map payload. Two notices for the same aggregate merge.
    pub fn lifecycle(
        record: &AggregateRecord,
        state: LifecycleState,
        destination: Destination,
    ) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("aggregate".to_string(), serde_json::json!(record.id.to_string()));
        entries.insert("lifecycle".to_string(), serde_json::json!(state.as_str()));
        entries.insert("state".to_string(), record.state.clone());

        Self::new(Payload::Map { entries })
            .from_aggregate(record.id.clone())
            .to(destination)
            .merge_as(format!("lifecycle:{}:{}", record.id.kind, record.id.id))
    }

    pub fn from_aggregate(mut self, aggregate_id: AggregateId) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    /// Add a destination.
    pub fn to(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn merge_as(mut self, key: impl Into<String>) -> Self {
        self.merge_key = Some(key.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == DispatchStatus::Pending
    }

    pub fn is_dispatched(&self) -> bool {
        self.status == DispatchStatus::Dispatched
    }

    /// Move Pending -> Dispatched. Returns false if the message was already
    /// dispatched.
    pub fn mark_dispatched(&mut self) -> bool {
        if self.is_pending() {
            self.status = DispatchStatus::Dispatched;
            true
        } else {
            false
        }
    }

    /// Names of the queues and topics this message targets.
    pub fn destination_names(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(|d| d.name.as_str())
    }

    pub fn is_mergeable_with(&self, other: &Message) -> bool {
        match (&self.merge_key, &other.merge_key) {
            (Some(a), Some(b)) => a == b && self.destinations == other.destinations,
            _ => false,
        }
    }

    /// Collapse `later` into `self`. The later message's id, payload and
    /// timestamp win; metadata is combined with later keys overriding.
    pub fn merge(self, later: Message) -> Message {
        let mut metadata = self.metadata;
        metadata.extend(later.metadata);
        Message {
            metadata,
            aggregate_id: later.aggregate_id.or(self.aggregate_id),
            ..later
        }
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}
