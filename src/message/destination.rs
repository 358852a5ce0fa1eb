use std::fmt;

use serde::{Deserialize, Serialize};

/// Broker id used when a destination does not name one.
pub const DEFAULT_BROKER: &str = "default";

/// Where a message goes: a broker, a queue or topic name, and whether delivery
/// fans out (topic) or goes to one competing consumer (queue).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub broker_id: String,
    pub name: String,
    pub multicast: bool,
}

impl Destination {
    /// Point-to-point destination on the default broker.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            broker_id: DEFAULT_BROKER.to_string(),
            name: name.into(),
            multicast: false,
        }
    }

    /// Fan-out destination on the default broker.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            broker_id: DEFAULT_BROKER.to_string(),
            name: name.into(),
            multicast: true,
        }
    }

    pub fn on_broker(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_id = broker_id.into();
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.multicast { "topic" } else { "queue" };
        write!(f, "{}://{}/{}", self.broker_id, kind, self.name)
    }
}
