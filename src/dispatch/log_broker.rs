use std::sync::{Arc, Mutex};

use tracing::info;

use super::{Broker, BrokerContext, BrokerDestination, BrokerError, BrokerMessage, Producer};

/// A broker that logs every send, or appends it to a buffer.
///
/// Accepts any broker id. Useful for wiring a runtime before a real broker
/// exists.
#[derive(Clone, Default)]
pub struct LogBroker {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogBroker {
    pub fn new() -> Self {
        LogBroker { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogBroker {
            buffer: Some(buffer),
        }
    }
}

impl Broker for LogBroker {
    fn create_context(&self, broker_id: &str) -> Result<Arc<dyn BrokerContext>, BrokerError> {
        Ok(Arc::new(LogContext {
            broker_id: broker_id.to_string(),
            buffer: self.buffer.clone(),
        }))
    }
}

struct LogContext {
    broker_id: String,
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl BrokerContext for LogContext {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        Ok(Box::new(LogProducer {
            buffer: self.buffer.clone(),
        }))
    }

    fn create_destination(
        &self,
        name: &str,
        multicast: bool,
    ) -> Result<BrokerDestination, BrokerError> {
        Ok(BrokerDestination {
            broker_id: self.broker_id.clone(),
            name: name.to_string(),
            multicast,
        })
    }
}

struct LogProducer {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl Producer for LogProducer {
    fn send(
        &self,
        destination: &BrokerDestination,
        message: BrokerMessage,
    ) -> Result<(), BrokerError> {
        match &self.buffer {
            Some(buffer) => {
                let line = format!(
                    "[OUTBOX] {}/{} {} {}",
                    destination.broker_id, destination.name, message.id, message.payload
                );
                buffer
                    .lock()
                    .map_err(|_| BrokerError::LockPoisoned("log buffer"))?
                    .push(line);
            }
            None => info!(
                broker = %destination.broker_id,
                destination = %destination.name,
                multicast = destination.multicast,
                message_id = %message.id,
                payload = %message.payload,
                "outbox message sent"
            ),
        }
        Ok(())
    }
}
