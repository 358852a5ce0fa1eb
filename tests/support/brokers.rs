//! Broker wrapper whose sends block while a gate is closed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use sourced_outbox::dispatch::{
    Broker, BrokerContext, BrokerDestination, BrokerError, BrokerMessage, InMemoryBroker, Producer,
};

struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct GatedBroker {
    inner: InMemoryBroker,
    gate: Arc<Gate>,
}

impl GatedBroker {
    pub fn new(inner: InMemoryBroker) -> Self {
        Self {
            inner,
            gate: Arc::new(Gate {
                open: Mutex::new(true),
                changed: Condvar::new(),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    pub fn close(&self) {
        *self.gate.open.lock().unwrap() = false;
    }

    pub fn open(&self) {
        *self.gate.open.lock().unwrap() = true;
        self.gate.changed.notify_all();
    }

    /// Sends currently blocked at the gate.
    pub fn waiting(&self) -> usize {
        self.gate.waiting.load(Ordering::SeqCst)
    }
}

impl Broker for GatedBroker {
    fn create_context(&self, broker_id: &str) -> Result<Arc<dyn BrokerContext>, BrokerError> {
        Ok(Arc::new(GatedContext {
            inner: self.inner.create_context(broker_id)?,
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct GatedContext {
    inner: Arc<dyn BrokerContext>,
    gate: Arc<Gate>,
}

impl BrokerContext for GatedContext {
    fn broker_id(&self) -> &str {
        self.inner.broker_id()
    }

    fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        Ok(Box::new(GatedProducer {
            inner: self.inner.create_producer()?,
            gate: Arc::clone(&self.gate),
        }))
    }

    fn create_destination(
        &self,
        name: &str,
        multicast: bool,
    ) -> Result<BrokerDestination, BrokerError> {
        self.inner.create_destination(name, multicast)
    }
}

struct GatedProducer {
    inner: Box<dyn Producer>,
    gate: Arc<Gate>,
}

impl Producer for GatedProducer {
    fn send(
        &self,
        destination: &BrokerDestination,
        message: BrokerMessage,
    ) -> Result<(), BrokerError> {
        self.gate.pass();
        self.inner.send(destination, message)
    }
}
