use std::sync::Arc;

use sourced_outbox::dispatch::BrokerPayload;
use sourced_outbox::{
    InMemoryBroker, InMemoryStore, MarshallingScheme, OutboxConfig, Payload, Registration,
};

use crate::support::harness::start_with;
use crate::support::orders::{Order, ORDERS_QUEUE};

fn dispatch_with(scheme: MarshallingScheme, payload: Payload) -> (InMemoryBroker, Payload) {
    let store = InMemoryStore::new();
    let broker = InMemoryBroker::new();
    let config = OutboxConfig {
        marshalling: scheme,
        ..OutboxConfig::default()
    };
    let runtime = start_with(config, &store, Arc::new(broker.clone()));

    let order = Order::place("A1", "alice", 100);
    let mut message = order.created_message();
    message.payload = payload.clone();

    let tx = runtime.begin().unwrap();
    runtime.register(Registration::message(message)).unwrap();
    tx.commit().unwrap();
    runtime.shutdown();

    (broker, payload)
}

#[test]
fn json_scheme_sends_text_envelope() {
    let (broker, payload) = dispatch_with(MarshallingScheme::Json, Payload::bytes(vec![1u8, 2, 3]));

    let received = broker.receive(ORDERS_QUEUE).unwrap();
    let BrokerPayload::Text(text) = &received.payload else {
        panic!("json scheme sends text");
    };
    let envelope: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(envelope["aggregate"], "Order:A1");
    assert_eq!(envelope["body"]["base64"], "AQID");
    assert_eq!(MarshallingScheme::Json.unmarshal(&received).unwrap(), payload);
}

#[test]
fn binary_scheme_sends_bytes() {
    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Placed {
        order: String,
        total: u64,
    }

    let placed = Placed {
        order: "A1".into(),
        total: 100,
    };
    let (broker, payload) =
        dispatch_with(MarshallingScheme::Binary, Payload::object(&placed).unwrap());

    let received = broker.receive(ORDERS_QUEUE).unwrap();
    assert!(matches!(received.payload, BrokerPayload::Bytes(_)));
    let decoded = MarshallingScheme::Binary.unmarshal(&received).unwrap();
    assert_eq!(decoded, payload);
    assert_eq!(
        decoded.decode_object::<Placed>().unwrap().unwrap(),
        placed
    );
}

#[test]
fn native_scheme_passes_form_through() {
    let (broker, _) = dispatch_with(
        MarshallingScheme::Native,
        Payload::map([("total", serde_json::json!(100))]),
    );

    let received = broker.receive(ORDERS_QUEUE).unwrap();
    assert!(matches!(received.payload, BrokerPayload::Map(ref m) if m["total"] == 100));
    assert_eq!(received.header("aggregate"), Some("Order:A1"));
}
