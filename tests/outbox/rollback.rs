use std::sync::{Arc, Mutex};

use sourced_outbox::uow::{CompletionListener, RegistrationKey};
use sourced_outbox::{
    AggregateStore, InMemoryBroker, InMemoryStore, MessageStorage, OutboxConfig, OutboxRuntime,
    Registration, UowError,
};

use crate::support::harness::start;
use crate::support::orders::Order;

#[derive(Default)]
struct Outcomes {
    seen: Mutex<Vec<bool>>,
}

impl CompletionListener for Outcomes {
    fn on_completed(&self, _registration: &Registration, success: bool) {
        self.seen.lock().unwrap().push(success);
    }
}

#[test]
fn rollback_discards_outbox_and_reports_failure() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let outcomes = Arc::new(Outcomes::default());
    let runtime = OutboxRuntime::builder(OutboxConfig::default())
        .store(store.clone())
        .broker(Arc::new(broker.clone()))
        .listener(outcomes.clone())
        .start()
        .unwrap();

    let order = Order::place("A1", "alice", 100);
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(order.created_message()))
        .unwrap();
    tx.rollback();

    assert!(store.messages().unwrap().is_empty());
    assert!(store.load(&order.aggregate_id()).unwrap().is_none());
    assert_eq!(*outcomes.seen.lock().unwrap(), vec![false, false]);

    let report = runtime.shutdown();
    assert_eq!(report.stats.batches, 0);
    assert!(broker.is_empty());
}

#[test]
fn dropped_transaction_rolls_back() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));
    let order = Order::place("A1", "alice", 100);

    {
        let _tx = runtime.begin().unwrap();
        runtime
            .register(Registration::message(order.created_message()))
            .unwrap();
    }

    assert!(store.messages().unwrap().is_empty());
    assert_eq!(runtime.manager().active_units(), 0);
    runtime.shutdown();
}

#[test]
fn register_outside_transaction_is_rejected() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));

    let err = runtime
        .register(Registration::message(
            Order::place("A1", "alice", 1).created_message(),
        ))
        .unwrap_err();
    assert_eq!(err, UowError::NoActiveTransaction);
    runtime.shutdown();
}

#[test]
fn deregistered_message_is_not_written() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));
    let order = Order::place("A1", "alice", 100);
    let message = order.created_message();

    let tx = runtime.begin().unwrap();
    runtime
        .register(Registration::message(message.clone()))
        .unwrap();
    let removed = runtime
        .manager()
        .deregister(&RegistrationKey::Message(message.id.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert!(removed);
    assert!(store.messages().unwrap().is_empty());
    runtime.shutdown();
}

#[test]
fn created_then_removed_writes_nothing() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));
    let order = Order::place("A1", "alice", 100);

    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::removed(order.record(0)))
        .unwrap();
    tx.commit().unwrap();

    assert!(store.load(&order.aggregate_id()).unwrap().is_none());
    runtime.shutdown();
}
