//! Sagas started by dispatched outbox messages.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use sourced_outbox::dispatch::DispatchOutcome;
use sourced_outbox::saga::{AttributeValue, SagaManager};
use sourced_outbox::{
    InMemoryBroker, InMemoryStore, MessageStorage, OutboxConfig, OutboxRuntime, QueueSelector,
    Registration, Saga, SagaError, SagaStore, TransactionManager,
};

use support::orders::{Order, ORDERS_QUEUE, ORDER_EVENTS_TOPIC};
use support::sagas::{AdHocSaga, AdHocSagaManager, CountingSagaManager};
use support::wait::{wait_until, WAIT};

fn runtime(
    store: &InMemoryStore,
    tm: &TransactionManager,
    managers: Vec<Arc<dyn SagaManager>>,
) -> OutboxRuntime {
    managers
        .into_iter()
        .fold(
            OutboxRuntime::builder(OutboxConfig::default())
                .store(store.clone())
                .transactions(tm.clone())
                .broker(Arc::new(InMemoryBroker::new())),
            |builder, manager| builder.saga_manager(manager),
        )
        .start()
        .unwrap()
}

fn transactions(store: &InMemoryStore) -> TransactionManager {
    TransactionManager::resource_local(Arc::new(store.clone()))
}

fn place(runtime: &OutboxRuntime, order: &Order) -> sourced_outbox::Message {
    let message = order.created_message();
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(message.clone()))
        .unwrap();
    tx.commit().unwrap();
    message
}

fn sagas_for(store: &InMemoryStore, message_id: &str) -> Vec<Saga> {
    store
        .sagas()
        .unwrap()
        .into_iter()
        .filter(|saga| saga.trigger_message == message_id)
        .collect()
}

#[test]
fn committed_order_starts_one_saga() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let manager = CountingSagaManager::new("orders", QueueSelector::exact(ORDERS_QUEUE), &store, &tm);
    let runtime = runtime(&store, &tm, vec![manager.clone() as Arc<dyn SagaManager>]);

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert_eq!(store.messages().unwrap().len(), 1);

    assert!(wait_until(WAIT, || sagas_for(&store, &message.id).len() == 1));
    runtime.shutdown();

    let stored = store.get(&message.id).unwrap().unwrap();
    assert!(stored.is_dispatched());
    assert_eq!(manager.begins(&message.id), 1);

    let saga = &sagas_for(&store, &message.id)[0];
    assert_eq!(saga.queue, ORDERS_QUEUE);
    assert_eq!(saga.tracking_token, message.id);
    assert!(saga.active);
    assert_eq!(
        saga.attributes.first("order"),
        Some(&AttributeValue::from("A1"))
    );
}

#[test]
fn redispatch_does_not_begin_again() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let manager = CountingSagaManager::new("orders", QueueSelector::exact(ORDERS_QUEUE), &store, &tm);
    let runtime = runtime(&store, &tm, vec![manager.clone() as Arc<dyn SagaManager>]);

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert!(wait_until(WAIT, || manager.begins(&message.id) == 1));

    let outcome = runtime.dispatcher().dispatch(&message).unwrap();
    assert_eq!(outcome, DispatchOutcome::AlreadyDispatched);
    runtime.shutdown();

    assert_eq!(manager.total_begins(), 1);
    assert_eq!(sagas_for(&store, &message.id).len(), 1);
}

#[test]
fn every_matching_manager_persists_once() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let orders = CountingSagaManager::new("orders", QueueSelector::exact(ORDERS_QUEUE), &store, &tm);
    let events =
        CountingSagaManager::new("events", QueueSelector::prefix("order-"), &store, &tm);
    let runtime = runtime(&store, &tm, vec![orders.clone() as Arc<dyn SagaManager>, events.clone()]);

    let order = Order::place("A1", "alice", 100);
    let message = order
        .created_message()
        .to(sourced_outbox::Destination::topic(ORDER_EVENTS_TOPIC));
    let tx = runtime.begin().unwrap();
    runtime
        .register(Registration::message(message.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert!(wait_until(WAIT, || sagas_for(&store, &message.id).len() == 2));
    runtime.shutdown();

    assert_eq!(orders.begins(&message.id), 1);
    assert_eq!(events.begins(&message.id), 1);
    let mut queues: Vec<String> = sagas_for(&store, &message.id)
        .into_iter()
        .map(|saga| saga.queue)
        .collect();
    queues.sort();
    assert_eq!(queues, [ORDER_EVENTS_TOPIC, ORDERS_QUEUE]);
}

#[test]
fn unmatched_destination_starts_nothing() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let manager = CountingSagaManager::new("billing", QueueSelector::exact("billing"), &store, &tm);
    let runtime = runtime(&store, &tm, vec![manager.clone() as Arc<dyn SagaManager>]);

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert!(wait_until(WAIT, || store.pending().unwrap().is_empty()));
    runtime.shutdown();

    assert_eq!(manager.total_begins(), 0);
    assert!(sagas_for(&store, &message.id).is_empty());
}

#[test]
fn retrigger_continues_tracked_saga() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let manager = CountingSagaManager::new("orders", QueueSelector::exact(ORDERS_QUEUE), &store, &tm);
    let runtime = runtime(&store, &tm, vec![manager.clone() as Arc<dyn SagaManager>]);

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert!(wait_until(WAIT, || sagas_for(&store, &message.id).len() == 1));
    let trigger = Arc::clone(runtime.saga_trigger().unwrap());

    let resumed = trigger.retrigger(&message, &message.id).unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, sagas_for(&store, &message.id)[0].id);
    assert_eq!(manager.begins(&message.id), 2);

    let err = trigger.retrigger(&message, "no-such-token").unwrap_err();
    assert!(matches!(err, SagaError::UnknownTrackingToken { .. }));
    runtime.shutdown();
    assert_eq!(sagas_for(&store, &message.id).len(), 1);
}

#[test]
fn unregistered_saga_type_is_not_persisted() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let runtime = runtime(
        &store,
        &tm,
        vec![AdHocSagaManager::new(QueueSelector::exact(ORDERS_QUEUE)) as Arc<dyn SagaManager>],
    );

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert!(wait_until(WAIT, || store.pending().unwrap().is_empty()));
    runtime.shutdown();

    assert!(store.get(&message.id).unwrap().unwrap().is_dispatched());
    assert!(store.sagas().unwrap().is_empty());
}

#[test]
fn rejected_saga_rolls_back_enclosing_transaction() {
    let store = InMemoryStore::new();
    let tm = transactions(&store);
    let runtime = runtime(&store, &tm, Vec::new());
    let trigger = Arc::clone(runtime.saga_trigger().unwrap());

    let order = Order::place("A1", "alice", 100);
    let message = order.created_message();
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    let err = trigger
        .persist(Box::new(AdHocSaga(Saga::begin(ORDERS_QUEUE, &message))))
        .unwrap_err();
    assert!(matches!(err, SagaError::NotPersistable { .. }));
    assert!(tx.commit().is_err());

    assert!(store.sagas().unwrap().is_empty());
    assert!(sourced_outbox::AggregateStore::load(&store, &order.aggregate_id())
        .unwrap()
        .is_none());
    assert_eq!(trigger.cached_types(), 1);
    runtime.shutdown();
}

#[test]
fn registered_saga_type_becomes_persistable() {
    let store = InMemoryStore::new();
    store.register_saga_type::<AdHocSaga>().unwrap();
    let tm = transactions(&store);
    let runtime = runtime(
        &store,
        &tm,
        vec![AdHocSagaManager::new(QueueSelector::exact(ORDERS_QUEUE)) as Arc<dyn SagaManager>],
    );

    let message = place(&runtime, &Order::place("A1", "alice", 100));
    assert!(wait_until(WAIT, || sagas_for(&store, &message.id).len() == 1));
    runtime.shutdown();
}
