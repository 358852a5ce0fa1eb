use std::sync::Arc;

use sourced_outbox::transaction::{TransactionMode, TransactionalResource};
use sourced_outbox::{
    AggregateStore, DispatchStatus, InMemoryBroker, InMemoryStore, LifecycleState, Message,
    MessageStorage, OutboxConfig, OutboxRuntime, Payload, Registration, TransactionManager,
};

use crate::support::brokers::GatedBroker;
use crate::support::harness::start;
use crate::support::orders::Order;
use crate::support::wait::{wait_until, WAIT};

#[test]
fn commit_stores_aggregate_and_pending_message_together() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let gated = GatedBroker::new(broker.clone());
    gated.close();
    let runtime = start(&store, Arc::new(gated.clone()));

    let order = Order::place("A1", "alice", 100);
    let message = order.created_message();

    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(message.clone()))
        .unwrap();
    tx.commit().unwrap();

    // the worker is parked at the broker, so the row is still PENDING
    let stored = store.get(&message.id).unwrap().unwrap();
    assert_eq!(stored.status, DispatchStatus::Pending);
    assert_eq!(stored.aggregate_id, Some(order.aggregate_id()));
    let record = store.load(&order.aggregate_id()).unwrap().unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.decode::<Order>().unwrap(), order);

    gated.open();
    assert!(wait_until(WAIT, || store.pending().unwrap().is_empty()));
    assert_eq!(broker.delivered_ids(), vec![message.id.clone()]);

    runtime.shutdown();
}

#[test]
fn nothing_is_visible_before_commit() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));
    let order = Order::place("A1", "alice", 100);

    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(order.created_message()))
        .unwrap();

    assert!(store.load(&order.aggregate_id()).unwrap().is_none());
    assert!(store.messages().unwrap().is_empty());

    tx.commit().unwrap();
    assert!(store.load(&order.aggregate_id()).unwrap().is_some());
    assert_eq!(store.messages().unwrap().len(), 1);

    runtime.shutdown();
}

#[test]
fn conflicting_update_rolls_back_its_outbox_rows() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let runtime = start(&store, Arc::new(broker.clone()));

    let mut order = Order::place("A1", "alice", 100);
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    tx.commit().unwrap();

    // both writers loaded version 1
    order.pay();
    let stale = runtime.begin().unwrap();
    runtime.register(order.updated(1)).unwrap();
    let stale_message = order.lifecycle_message(1, LifecycleState::Updated);
    runtime
        .register(Registration::message(stale_message.clone()))
        .unwrap();

    let winner = runtime.begin().unwrap();
    runtime.register(order.updated(1)).unwrap();
    let winner_message = order.created_message();
    runtime
        .register(Registration::message(winner_message.clone()))
        .unwrap();
    winner.commit().unwrap();

    let err = stale.commit().unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(store.load(&order.aggregate_id()).unwrap().unwrap().version, 2);
    assert!(store.get(&stale_message.id).unwrap().is_none());
    assert!(store.get(&winner_message.id).unwrap().is_some());
    assert_eq!(runtime.manager().active_units(), 0);

    let report = runtime.shutdown();
    assert_eq!(report.stats.dispatched, 1);
    assert_eq!(broker.delivered_ids(), vec![winner_message.id]);
}

/// Runtime over separate aggregate and outbox stores under one two-phase
/// coordinator.
fn split_stores(
    aggregates: &InMemoryStore,
    outbox: &InMemoryStore,
    broker: &InMemoryBroker,
) -> OutboxRuntime {
    let tm = TransactionManager::two_phase(vec![
        Arc::new(aggregates.clone()) as Arc<dyn TransactionalResource>,
        Arc::new(outbox.clone()),
    ])
    .unwrap();
    OutboxRuntime::builder(OutboxConfig {
        transaction_mode: TransactionMode::TwoPhase,
        ..OutboxConfig::default()
    })
    .transactions(tm)
    .aggregates(Arc::new(aggregates.clone()))
    .messages(Arc::new(outbox.clone()))
    .broker(Arc::new(broker.clone()))
    .start()
    .unwrap()
}

#[test]
fn two_phase_commit_spans_both_stores() {
    let aggregates = InMemoryStore::new();
    let outbox = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let runtime = split_stores(&aggregates, &outbox, &broker);

    let order = Order::place("A1", "alice", 100);
    let message = order.created_message();
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(message.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(aggregates.load(&order.aggregate_id()).unwrap().unwrap().version, 1);
    assert!(aggregates.messages().unwrap().is_empty());
    assert!(wait_until(WAIT, || outbox
        .get(&message.id)
        .unwrap()
        .is_some_and(|row| row.is_dispatched())));
    runtime.shutdown();
    assert_eq!(broker.delivered_ids(), [message.id.as_str()]);
}

#[test]
fn two_phase_outbox_failure_rolls_back_aggregate() {
    let aggregates = InMemoryStore::new();
    let outbox = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let runtime = split_stores(&aggregates, &outbox, &broker);

    let first = Message::with_id("m-1", Payload::text("first"));
    let tx = runtime.begin().unwrap();
    runtime.register(Registration::message(first)).unwrap();
    tx.commit().unwrap();

    let order = Order::place("A1", "alice", 100);
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(Message::with_id(
            "m-1",
            Payload::text("again"),
        )))
        .unwrap();
    let err = tx.commit().unwrap_err();

    assert!(err.to_string().contains("m-1"));
    assert!(aggregates.load(&order.aggregate_id()).unwrap().is_none());
    assert_eq!(outbox.messages().unwrap().len(), 1);
    assert_eq!(aggregates.staged_transactions(), 0);
    assert_eq!(outbox.staged_transactions(), 0);
    runtime.shutdown();
}

#[test]
fn remove_and_recreate_in_one_transaction() {
    let store = InMemoryStore::new();
    let runtime = start(&store, Arc::new(InMemoryBroker::new()));
    let order = Order::place("A1", "alice", 100);

    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    tx.commit().unwrap();

    let mut replacement = Order::place("A1", "bob", 40);
    replacement.pay();
    let tx = runtime.begin().unwrap();
    runtime
        .register(Registration::removed(order.record(1)))
        .unwrap();
    runtime.register(replacement.created()).unwrap();
    tx.commit().unwrap();

    let stored = store.load(&order.aggregate_id()).unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.state["customer"], "bob");
    runtime.shutdown();
}
