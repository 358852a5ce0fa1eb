use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::{Broker, BrokerContext, BrokerError, BrokerMessage, DispatchError, MarshallingScheme};
use crate::message::{Destination, Message, DEFAULT_BROKER};
use crate::saga::SagaTrigger;
use crate::store::MessageStorage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent to every destination and flipped to DISPATCHED by this call.
    Dispatched,
    /// Another path already flipped the row.
    AlreadyDispatched,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Sends outbox messages to their destinations and records the outcome.
pub struct OutboxDispatcher {
    broker: Arc<dyn Broker>,
    storage: Arc<dyn MessageStorage>,
    scheme: MarshallingScheme,
    broker_ids: Vec<String>,
    sagas: Option<Arc<SagaTrigger>>,
    contexts: Mutex<HashMap<String, Arc<dyn BrokerContext>>>,
}

impl OutboxDispatcher {
    pub fn new(broker: Arc<dyn Broker>, storage: Arc<dyn MessageStorage>) -> Self {
        Self {
            broker,
            storage,
            scheme: MarshallingScheme::default(),
            broker_ids: vec![DEFAULT_BROKER.to_string()],
            sagas: None,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scheme(mut self, scheme: MarshallingScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Broker ids that must resolve in [`prepare`](Self::prepare).
    pub fn with_broker_ids<I, S>(mut self, broker_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broker_ids = broker_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Begin sagas for every message this dispatcher flips to DISPATCHED.
    pub fn with_sagas(mut self, trigger: Arc<SagaTrigger>) -> Self {
        self.sagas = Some(trigger);
        self
    }

    pub fn scheme(&self) -> MarshallingScheme {
        self.scheme
    }

    pub fn storage(&self) -> &Arc<dyn MessageStorage> {
        &self.storage
    }

    /// Resolve every configured broker id once, caching the contexts.
    pub fn prepare(&self) -> Result<(), BrokerError> {
        for broker_id in &self.broker_ids {
            self.context(broker_id)?;
        }
        info!(brokers = ?self.broker_ids, scheme = self.scheme.as_str(), "outbox dispatcher ready");
        Ok(())
    }

    /// Dispatch a batch in order. A failed message stays PENDING and does
    /// not stop the rest of the batch.
    pub fn accept(&self, messages: &[Message]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for message in messages {
            match self.dispatch(message) {
                Ok(DispatchOutcome::Dispatched) => report.dispatched += 1,
                Ok(DispatchOutcome::AlreadyDispatched) => report.skipped += 1,
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "dispatch failed, message stays pending");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn dispatch(&self, message: &Message) -> Result<DispatchOutcome, DispatchError> {
        if let Some(stored) = self.storage.get(&message.id)? {
            if stored.is_dispatched() {
                debug!(message_id = %message.id, "already dispatched, skipping");
                return Ok(DispatchOutcome::AlreadyDispatched);
            }
        }

        let outgoing = self.scheme.marshal(message)?;
        for destination in &message.destinations {
            self.send(destination, outgoing.clone())?;
        }

        if !self.storage.mark_dispatched(&message.id)? {
            debug!(message_id = %message.id, "dispatched concurrently by another path");
            return Ok(DispatchOutcome::AlreadyDispatched);
        }
        debug!(
            message_id = %message.id,
            destinations = message.destinations.len(),
            "message dispatched"
        );

        if let Some(sagas) = &self.sagas {
            sagas.trigger(message);
        }
        Ok(DispatchOutcome::Dispatched)
    }

    /// Send one marshalled message to one destination.
    pub fn send(&self, destination: &Destination, message: BrokerMessage) -> Result<(), BrokerError> {
        let context = self.context(&destination.broker_id)?;
        let result = context.create_producer().and_then(|producer| {
            let target = context.create_destination(&destination.name, destination.multicast)?;
            producer.send(&target, message)
        });

        if let Err(BrokerError::Unreachable { .. }) = &result {
            self.evict(&destination.broker_id);
        }
        result
    }

    fn context(&self, broker_id: &str) -> Result<Arc<dyn BrokerContext>, BrokerError> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("dispatcher contexts"))?;
        if let Some(context) = contexts.get(broker_id) {
            return Ok(Arc::clone(context));
        }
        let context = self.broker.create_context(broker_id)?;
        contexts.insert(broker_id.to_string(), Arc::clone(&context));
        Ok(context)
    }

    fn evict(&self, broker_id: &str) {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.remove(broker_id);
        }
    }
}
