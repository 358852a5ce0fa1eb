use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::{BrokerError, BrokerMessage, BrokerPayload};
use crate::message::{Message, Payload};

pub const CONTENT_TYPE_HEADER: &str = "content-type";
pub const AGGREGATE_HEADER: &str = "aggregate";

/// How a message body is put on the wire.
///
/// - `Native` keeps the payload form (bytes, text, map, object)
/// - `Json` wraps id, metadata and body in a JSON text envelope; binary
///   bodies are base64 encoded
/// - `Binary` wraps the same envelope in bitcode bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarshallingScheme {
    #[default]
    Native,
    Json,
    Binary,
}

#[derive(Serialize, Deserialize)]
struct JsonEnvelope {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aggregate: Option<String>,
    created_at_ms: u64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    body: JsonBody,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
enum JsonBody {
    Bytes {
        base64: String,
    },
    Text {
        text: String,
    },
    Map {
        entries: BTreeMap<String, serde_json::Value>,
    },
    Object {
        type_name: String,
        base64: String,
    },
}

// bitcode cannot drive self-describing formats, so maps travel as JSON text
#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    id: String,
    aggregate: Option<String>,
    created_at_ms: u64,
    metadata: BTreeMap<String, String>,
    body: BinaryBody,
}

#[derive(Serialize, Deserialize)]
enum BinaryBody {
    Bytes(Vec<u8>),
    Text(String),
    Map(String),
    Object { type_name: String, bytes: Vec<u8> },
}

impl MarshallingScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarshallingScheme::Native => "native",
            MarshallingScheme::Json => "json",
            MarshallingScheme::Binary => "binary",
        }
    }

    pub fn marshal(&self, message: &Message) -> Result<BrokerMessage, BrokerError> {
        let payload = match self {
            MarshallingScheme::Native => native_payload(&message.payload),
            MarshallingScheme::Json => {
                let envelope = JsonEnvelope {
                    id: message.id.clone(),
                    aggregate: message.aggregate_id.as_ref().map(ToString::to_string),
                    created_at_ms: created_at_ms(message),
                    metadata: message.metadata.clone(),
                    body: json_body(&message.payload),
                };
                let text = serde_json::to_string(&envelope)
                    .map_err(|err| marshal_error(&message.id, err))?;
                BrokerPayload::Text(text)
            }
            MarshallingScheme::Binary => {
                let envelope = BinaryEnvelope {
                    id: message.id.clone(),
                    aggregate: message.aggregate_id.as_ref().map(ToString::to_string),
                    created_at_ms: created_at_ms(message),
                    metadata: message.metadata.clone(),
                    body: binary_body(&message.id, &message.payload)?,
                };
                let bytes = bitcode::serialize(&envelope)
                    .map_err(|err| marshal_error(&message.id, err))?;
                BrokerPayload::Bytes(bytes)
            }
        };

        let mut out = BrokerMessage::new(message.id.clone(), payload)
            .with_header(CONTENT_TYPE_HEADER, self.content_type(&message.payload));
        if let Some(aggregate) = &message.aggregate_id {
            out = out.with_header(AGGREGATE_HEADER, aggregate.to_string());
        }
        for (key, value) in &message.metadata {
            out.headers.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(out)
    }

    /// Recover the original payload from a marshalled message.
    pub fn unmarshal(&self, message: &BrokerMessage) -> Result<Payload, BrokerError> {
        match (self, &message.payload) {
            (MarshallingScheme::Native, payload) => Ok(from_native(payload)),
            (MarshallingScheme::Json, BrokerPayload::Text(text)) => {
                let envelope: JsonEnvelope =
                    serde_json::from_str(text).map_err(|err| marshal_error(&message.id, err))?;
                from_json_body(&message.id, envelope.body)
            }
            (MarshallingScheme::Binary, BrokerPayload::Bytes(bytes)) => {
                let envelope: BinaryEnvelope =
                    bitcode::deserialize(bytes).map_err(|err| marshal_error(&message.id, err))?;
                from_binary_body(&message.id, envelope.body)
            }
            (scheme, _) => Err(BrokerError::Marshal {
                message_id: message.id.clone(),
                reason: format!("body form does not match {} scheme", scheme.as_str()),
            }),
        }
    }

    fn content_type(&self, payload: &Payload) -> String {
        match self {
            MarshallingScheme::Native => payload.form().to_string(),
            MarshallingScheme::Json => "application/json".to_string(),
            MarshallingScheme::Binary => "application/x-bitcode".to_string(),
        }
    }
}

fn marshal_error(message_id: &str, err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Marshal {
        message_id: message_id.to_string(),
        reason: err.to_string(),
    }
}

fn created_at_ms(message: &Message) -> u64 {
    message
        .created_at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn native_payload(payload: &Payload) -> BrokerPayload {
    match payload {
        Payload::Bytes { bytes } => BrokerPayload::Bytes(bytes.clone()),
        Payload::Text { text } => BrokerPayload::Text(text.clone()),
        Payload::Map { entries } => BrokerPayload::Map(entries.clone()),
        Payload::Object { type_name, bytes } => BrokerPayload::Object {
            type_name: type_name.clone(),
            bytes: bytes.clone(),
        },
    }
}

fn from_native(payload: &BrokerPayload) -> Payload {
    match payload {
        BrokerPayload::Bytes(bytes) => Payload::bytes(bytes.clone()),
        BrokerPayload::Text(text) => Payload::text(text.clone()),
        BrokerPayload::Map(entries) => Payload::Map {
            entries: entries.clone(),
        },
        BrokerPayload::Object { type_name, bytes } => Payload::Object {
            type_name: type_name.clone(),
            bytes: bytes.clone(),
        },
    }
}

fn json_body(payload: &Payload) -> JsonBody {
    match payload {
        Payload::Bytes { bytes } => JsonBody::Bytes {
            base64: STANDARD.encode(bytes),
        },
        Payload::Text { text } => JsonBody::Text { text: text.clone() },
        Payload::Map { entries } => JsonBody::Map {
            entries: entries.clone(),
        },
        Payload::Object { type_name, bytes } => JsonBody::Object {
            type_name: type_name.clone(),
            base64: STANDARD.encode(bytes),
        },
    }
}

fn from_json_body(message_id: &str, body: JsonBody) -> Result<Payload, BrokerError> {
    Ok(match body {
        JsonBody::Bytes { base64 } => Payload::bytes(
            STANDARD
                .decode(base64)
                .map_err(|err| marshal_error(message_id, err))?,
        ),
        JsonBody::Text { text } => Payload::text(text),
        JsonBody::Map { entries } => Payload::Map { entries },
        JsonBody::Object { type_name, base64 } => Payload::Object {
            type_name,
            bytes: STANDARD
                .decode(base64)
                .map_err(|err| marshal_error(message_id, err))?,
        },
    })
}

fn binary_body(message_id: &str, payload: &Payload) -> Result<BinaryBody, BrokerError> {
    Ok(match payload {
        Payload::Bytes { bytes } => BinaryBody::Bytes(bytes.clone()),
        Payload::Text { text } => BinaryBody::Text(text.clone()),
        Payload::Map { entries } => BinaryBody::Map(
            serde_json::to_string(entries).map_err(|err| marshal_error(message_id, err))?,
        ),
        Payload::Object { type_name, bytes } => BinaryBody::Object {
            type_name: type_name.clone(),
            bytes: bytes.clone(),
        },
    })
}

fn from_binary_body(message_id: &str, body: BinaryBody) -> Result<Payload, BrokerError> {
    Ok(match body {
        BinaryBody::Bytes(bytes) => Payload::bytes(bytes),
        BinaryBody::Text(text) => Payload::text(text),
        BinaryBody::Map(json) => Payload::Map {
            entries: serde_json::from_str(&json).map_err(|err| marshal_error(message_id, err))?,
        },
        BinaryBody::Object { type_name, bytes } => Payload::Object { type_name, bytes },
    })
}
