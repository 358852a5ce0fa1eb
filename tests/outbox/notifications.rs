use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sourced_outbox::{
    InMemoryBroker, InMemoryStore, LifecycleNotifier, LifecycleState, OutboxConfig, OutboxRuntime,
};

use crate::support::orders::Order;

fn runtime_with(notifier: LifecycleNotifier) -> OutboxRuntime {
    OutboxRuntime::builder(OutboxConfig::default())
        .store(InMemoryStore::new())
        .broker(Arc::new(InMemoryBroker::new()))
        .notifier(notifier)
        .start()
        .unwrap()
}

#[test]
fn committed_aggregate_fires_lifecycle_event() {
    let notifier = LifecycleNotifier::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    notifier.on("Order", LifecycleState::Created, move |json| {
        let _ = tx.lock().unwrap().send(json);
    });
    let runtime = runtime_with(notifier);

    let order = Order::place("A1", "alice", 100);
    let transaction = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    transaction.commit().unwrap();

    let json = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["id"], "A1");
    assert_eq!(value["state"]["customer"], "alice");
    runtime.shutdown();
}

#[test]
fn rolled_back_aggregate_fires_nothing() {
    let notifier = LifecycleNotifier::new();
    let (tx, rx) = mpsc::channel::<String>();
    let tx = Mutex::new(tx);
    notifier.on("Order", LifecycleState::Created, move |json| {
        let _ = tx.lock().unwrap().send(json);
    });
    let runtime = runtime_with(notifier);

    let transaction = runtime.begin().unwrap();
    runtime
        .register(Order::place("A1", "alice", 100).created())
        .unwrap();
    transaction.rollback();

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    runtime.shutdown();
}
