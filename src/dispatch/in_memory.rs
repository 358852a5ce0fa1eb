//! In-memory broker for testing and single-process scenarios.
//!
//! Every send is appended to a shared delivery log. Queue (point-to-point)
//! sends also land in a per-queue FIFO drained by competing consumers via
//! [`InMemoryBroker::receive`]; topic (multicast) sends are read by
//! independent [`TopicSubscription`]s, each with its own position.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::{Broker, BrokerContext, BrokerDestination, BrokerError, BrokerMessage, Producer};
use crate::message::DEFAULT_BROKER;

/// One accepted send.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub destination: BrokerDestination,
    pub message: BrokerMessage,
}

struct Inner {
    broker_ids: RwLock<HashSet<String>>,
    online: AtomicBool,
    rejecting: RwLock<HashSet<String>>,
    log: RwLock<Vec<Delivery>>,
    queues: Mutex<HashMap<String, VecDeque<BrokerMessage>>>,
    contexts_created: AtomicUsize,
}

impl Inner {
    fn ensure_online(&self, broker_id: &str) -> Result<(), BrokerError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unreachable {
                broker: broker_id.to_string(),
                reason: "broker offline".into(),
            })
        }
    }
}

/// ## Example
///
/// ```
/// use sourced_outbox::dispatch::{Broker, BrokerMessage, BrokerPayload, InMemoryBroker};
///
/// let broker = InMemoryBroker::new();
/// let context = broker.create_context("default").unwrap();
/// let producer = context.create_producer().unwrap();
/// let queue = context.create_destination("orders", false).unwrap();
///
/// producer
///     .send(&queue, BrokerMessage::new("m-1", BrokerPayload::Text("hi".into())))
///     .unwrap();
///
/// assert_eq!(broker.receive("orders").unwrap().id, "m-1");
/// assert!(broker.receive("orders").is_none());
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker answering to the default broker id only.
    pub fn new() -> Self {
        let mut broker_ids = HashSet::new();
        broker_ids.insert(DEFAULT_BROKER.to_string());
        Self {
            inner: Arc::new(Inner {
                broker_ids: RwLock::new(broker_ids),
                online: AtomicBool::new(true),
                rejecting: RwLock::new(HashSet::new()),
                log: RwLock::new(Vec::new()),
                queues: Mutex::new(HashMap::new()),
                contexts_created: AtomicUsize::new(0),
            }),
        }
    }

    /// Also answer to `broker_id`.
    pub fn with_broker_id(self, broker_id: impl Into<String>) -> Self {
        if let Ok(mut ids) = self.inner.broker_ids.write() {
            ids.insert(broker_id.into());
        }
        self
    }

    /// Take the broker offline (every operation fails) or back online.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Make sends to `destination` fail until [`accept`](Self::accept).
    pub fn reject(&self, destination: impl Into<String>) {
        if let Ok(mut rejecting) = self.inner.rejecting.write() {
            rejecting.insert(destination.into());
        }
    }

    pub fn accept(&self, destination: &str) {
        if let Ok(mut rejecting) = self.inner.rejecting.write() {
            rejecting.remove(destination);
        }
    }

    /// Every accepted send, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.inner
            .log
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn deliveries_to(&self, destination: &str) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|delivery| delivery.destination.name == destination)
            .collect()
    }

    /// Message ids of every accepted send, in order.
    pub fn delivered_ids(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .map(|delivery| delivery.message.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.log.read().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next message from a queue.
    pub fn receive(&self, queue: &str) -> Option<BrokerMessage> {
        self.inner
            .queues
            .lock()
            .ok()?
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    /// Independent reader of a topic, starting at the beginning of the log.
    pub fn subscribe(&self, topic: impl Into<String>) -> TopicSubscription {
        TopicSubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.into(),
            position: Mutex::new(0),
        }
    }

    /// Number of contexts handed out so far.
    pub fn contexts_created(&self) -> usize {
        self.inner.contexts_created.load(Ordering::SeqCst)
    }
}

impl Broker for InMemoryBroker {
    fn create_context(&self, broker_id: &str) -> Result<Arc<dyn BrokerContext>, BrokerError> {
        let known = self
            .inner
            .broker_ids
            .read()
            .map_err(|_| BrokerError::LockPoisoned("broker ids read"))?
            .contains(broker_id);
        if !known {
            return Err(BrokerError::UnknownBroker(broker_id.to_string()));
        }
        self.inner.ensure_online(broker_id)?;
        self.inner.contexts_created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(InMemoryContext {
            broker_id: broker_id.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct InMemoryContext {
    broker_id: String,
    inner: Arc<Inner>,
}

impl BrokerContext for InMemoryContext {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        self.inner.ensure_online(&self.broker_id)?;
        Ok(Box::new(InMemoryProducer {
            inner: Arc::clone(&self.inner),
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

struct InMemoryProducer {
    inner: Arc<Inner>,
}

impl Producer for InMemoryProducer {
    fn send(
        &self,
        destination: &BrokerDestination,
        message: BrokerMessage,
    ) -> Result<(), BrokerError> {
        self.inner.ensure_online(&destination.broker_id)?;

        let rejected = self
            .inner
            .rejecting
            .read()
            .map_err(|_| BrokerError::LockPoisoned("rejecting read"))?
            .contains(&destination.name);
        if rejected {
            return Err(BrokerError::Rejected {
                destination: destination.name.clone(),
                message_id: message.id,
            });
        }

        if !destination.multicast {
            self.inner
                .queues
                .lock()
                .map_err(|_| BrokerError::LockPoisoned("queues lock"))?
                .entry(destination.name.clone())
                .or_default()
                .push_back(message.clone());
        }
        self.inner
            .log
            .write()
            .map_err(|_| BrokerError::LockPoisoned("log write"))?
            .push(Delivery {
                destination: destination.clone(),
                message,
            });
        Ok(())
    }
}

/// Reads multicast deliveries to one topic from its own position.
pub struct TopicSubscription {
    inner: Arc<Inner>,
    topic: String,
    position: Mutex<usize>,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message published to the topic since the last poll.
    pub fn poll(&self) -> Option<BrokerMessage> {
        let log = self.inner.log.read().ok()?;
        let mut position = self.position.lock().ok()?;
        while *position < log.len() {
            let delivery = &log[*position];
            *position += 1;
            if delivery.destination.multicast && delivery.destination.name == self.topic {
                return Some(delivery.message.clone());
            }
        }
        None
    }

    /// Everything published to the topic since the last poll.
    pub fn drain(&self) -> Vec<BrokerMessage> {
        std::iter::from_fn(|| self.poll()).collect()
    }
}
