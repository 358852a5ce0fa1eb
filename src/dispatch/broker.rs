//! Broker abstraction used by the dispatcher.
//!
//! A [`Broker`] resolves a broker id to a [`BrokerContext`], which creates
//! producers and destinations. Implementations might wrap a JMS-style
//! connection factory, a Kafka client or an AMQP channel.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::BrokerError;

/// Body forms a broker transports.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerPayload {
    Bytes(Vec<u8>),
    Text(String),
    Map(BTreeMap<String, serde_json::Value>),
    Object { type_name: String, bytes: Vec<u8> },
}

impl fmt::Display for BrokerPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerPayload::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            BrokerPayload::Text(text) => f.write_str(text),
            BrokerPayload::Map(entries) => {
                let json = serde_json::to_string(entries).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
            BrokerPayload::Object { type_name, bytes } => {
                write!(f, "<{} {} bytes>", type_name, bytes.len())
            }
        }
    }
}

/// What a producer sends: the outbox message id, its marshalled body and
/// string headers.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMessage {
    pub id: String,
    pub payload: BrokerPayload,
    pub headers: BTreeMap<String, String>,
}

impl BrokerMessage {
    pub fn new(id: impl Into<String>, payload: BrokerPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A resolved destination on one broker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BrokerDestination {
    pub broker_id: String,
    pub name: String,
    pub multicast: bool,
}

pub trait Broker: Send + Sync {
    fn create_context(&self, broker_id: &str) -> Result<Arc<dyn BrokerContext>, BrokerError>;
}

pub trait BrokerContext: Send + Sync {
    fn broker_id(&self) -> &str;

    fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError>;

    fn create_destination(
        &self,
        name: &str,
        multicast: bool,
    ) -> Result<BrokerDestination, BrokerError>;
}

pub trait Producer: Send {
    fn send(&self, destination: &BrokerDestination, message: BrokerMessage)
        -> Result<(), BrokerError>;
}
