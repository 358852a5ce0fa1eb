use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation key of one transaction. Unique per process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionKey {
    coordinator: u64,
    sequence: u64,
}

impl TransactionKey {
    pub(crate) fn new(coordinator: u64, sequence: u64) -> Self {
        Self {
            coordinator,
            sequence,
        }
    }

    pub(crate) fn coordinator(&self) -> u64 {
        self.coordinator
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}-{}", self.coordinator, self.sequence)
    }
}

/// How the coordinator commits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// One resource, committed directly.
    #[default]
    ResourceLocal,
    /// Any number of resources, all prepared before any commits.
    TwoPhase,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ResourceLocal => f.write_str("resource_local"),
            TransactionMode::TwoPhase => f.write_str("two_phase"),
        }
    }
}
