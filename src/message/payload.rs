use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Message body in one of the forms a broker accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Payload {
    Bytes { bytes: Vec<u8> },
    Text { text: String },
    Map { entries: BTreeMap<String, serde_json::Value> },
    /// A Rust value, bitcode-encoded, tagged with its type name.
    Object { type_name: String, bytes: Vec<u8> },
}

impl Payload {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Payload::Bytes {
            bytes: bytes.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, serde_json::Value)>,
    {
        Payload::Map {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Encode a value with bitcode (fast binary).
    pub fn object<T: Serialize>(value: &T) -> Result<Self, bitcode::Error> {
        Ok(Payload::Object {
            type_name: std::any::type_name::<T>().to_string(),
            bytes: bitcode::serialize(value)?,
        })
    }

    /// Decode an `Object` payload back into its value. Returns `None` for the
    /// other forms.
    pub fn decode_object<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Option<Result<T, bitcode::Error>> {
        match self {
            Payload::Object { bytes, .. } => Some(bitcode::deserialize(bytes)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            Payload::Bytes { bytes } => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn form(&self) -> &'static str {
        match self {
            Payload::Bytes { .. } => "bytes",
            Payload::Text { .. } => "text",
            Payload::Map { .. } => "map",
            Payload::Object { .. } => "object",
        }
    }
}
