use std::sync::Arc;

use sourced_outbox::dispatch::BrokerPayload;
use sourced_outbox::{
    Destination, InMemoryBroker, InMemoryStore, LifecycleState, Message, MessageStorage, Payload,
    Registration,
};

use crate::support::harness::start;
use crate::support::orders::{Order, ORDERS_QUEUE, ORDER_EVENTS_TOPIC};
use crate::support::wait::{wait_until, WAIT};

#[test]
fn messages_dispatched_in_registration_order() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let runtime = start(&store, Arc::new(broker.clone()));

    let ids = ["A", "B", "C"];
    let tx = runtime.begin().unwrap();
    for id in ids {
        runtime
            .register(Registration::message(
                Message::with_id(id, Payload::text(id)).to(Destination::queue(ORDERS_QUEUE)),
            ))
            .unwrap();
    }
    tx.commit().unwrap();

    let report = runtime.shutdown();
    assert_eq!(report.stats.dispatched, 3);
    assert_eq!(broker.delivered_ids(), ids);
    let received: Vec<String> = std::iter::from_fn(|| broker.receive(ORDERS_QUEUE))
        .map(|m| m.id)
        .collect();
    assert_eq!(received, ids);
}

#[test]
fn lifecycle_notices_for_one_aggregate_merge_into_latest() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let subscription = broker.subscribe(ORDER_EVENTS_TOPIC);
    let runtime = start(&store, Arc::new(broker.clone()));

    let mut order = Order::place("A1", "alice", 100);
    let tx = runtime.begin().unwrap();
    runtime.register(order.created()).unwrap();
    runtime
        .register(Registration::message(
            order.lifecycle_message(0, LifecycleState::Created),
        ))
        .unwrap();
    order.total = 250;
    runtime.register(order.updated(0)).unwrap();
    let latest = order.lifecycle_message(0, LifecycleState::Updated);
    runtime
        .register(Registration::message(latest.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(store.messages().unwrap().len(), 1);
    runtime.shutdown();

    let delivered = subscription.drain();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, latest.id);
    let BrokerPayload::Map(entries) = &delivered[0].payload else {
        panic!("lifecycle notices carry a map payload");
    };
    assert_eq!(entries["state"]["total"], 250);
    assert_eq!(entries["lifecycle"], "updated");
}

#[test]
fn concurrent_units_each_keep_their_own_order() {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let runtime = start(&store, Arc::new(broker.clone()));

    std::thread::scope(|scope| {
        for worker in ["x", "y", "z"] {
            let runtime = &runtime;
            scope.spawn(move || {
                let tx = runtime.begin().unwrap();
                for n in 0..3 {
                    let id = format!("{worker}-{n}");
                    runtime
                        .register(Registration::message(
                            Message::with_id(id.clone(), Payload::text(id))
                                .to(Destination::queue(ORDERS_QUEUE)),
                        ))
                        .unwrap();
                }
                tx.commit().unwrap();
            });
        }
    });

    assert!(wait_until(WAIT, || broker.len() == 9));
    let delivered = broker.delivered_ids();
    for worker in ["x", "y", "z"] {
        let own: Vec<&String> = delivered
            .iter()
            .filter(|id| id.starts_with(worker))
            .collect();
        assert_eq!(
            own,
            vec![
                &format!("{worker}-0"),
                &format!("{worker}-1"),
                &format!("{worker}-2")
            ]
        );
    }
    runtime.shutdown();
}
