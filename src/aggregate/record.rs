use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a consistency-boundary entity: its kind plus its id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateId {
    pub kind: String,
    pub id: String,
}

impl AggregateId {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Storage key: "KIND:id"
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// What a transaction did to an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Updated,
    Removed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Updated => "updated",
            LifecycleState::Removed => "removed",
        }
    }

    /// Combine two states recorded for the same aggregate within one unit of work.
    ///
    /// Returns `None` when the pair cancels out (created then removed before
    /// anything was ever written). Removed then created replaces the stored
    /// row, so it is an update of the loaded version.
    pub fn combine(self, later: LifecycleState) -> Option<LifecycleState> {
        match (self, later) {
            (LifecycleState::Created, LifecycleState::Removed) => None,
            (LifecycleState::Created, _) => Some(LifecycleState::Created),
            (_, LifecycleState::Removed) => Some(LifecycleState::Removed),
            (LifecycleState::Removed, _) => Some(LifecycleState::Updated),
            (LifecycleState::Updated, _) => Some(LifecycleState::Updated),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized aggregate state as handed to the persistence collaborator.
///
/// `version` is the version the caller loaded (0 for a new aggregate). The
/// store checks it on flush and bumps it on commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub id: AggregateId,
    pub version: u64,
    pub state: serde_json::Value,
}

impl AggregateRecord {
    pub fn new(id: AggregateId, version: u64, state: serde_json::Value) -> Self {
        Self { id, version, state }
    }

    /// Build a record from any serializable aggregate.
    pub fn from_state<T: Serialize>(
        id: AggregateId,
        version: u64,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, version, serde_json::to_value(state)?))
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}
