//! Inbound messages and correlation key extraction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::CorrelationKey;

/// Computes the correlation key for a message.
///
/// Returns `None` when the message carries no usable key.
pub trait KeyExtractor<M>: Send + Sync {
    fn extract(&self, message: &M) -> Option<CorrelationKey>;
}

impl<M, F> KeyExtractor<M> for F
where
    F: Fn(&M) -> Option<CorrelationKey> + Send + Sync,
{
    fn extract(&self, message: &M) -> Option<CorrelationKey> {
        self(message)
    }
}

/// A routed message: named headers plus a JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Value,
}

impl Message {
    pub fn new(body: Value) -> Self {
        Self {
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }
}

/// Strings become text keys, integers become integer keys.
fn key_from_value(value: &Value) -> Option<CorrelationKey> {
    match value {
        Value::String(s) => Some(CorrelationKey::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(CorrelationKey::Integer),
        _ => None,
    }
}

/// Reads the key from a named header.
#[derive(Debug, Clone)]
pub struct HeaderKey(pub String);

impl KeyExtractor<Message> for HeaderKey {
    fn extract(&self, message: &Message) -> Option<CorrelationKey> {
        message.header(&self.0).and_then(key_from_value)
    }
}

/// Reads the key from the body at a JSON pointer (e.g. `/order/id`).
#[derive(Debug, Clone)]
pub struct BodyPointerKey(pub String);

impl KeyExtractor<Message> for BodyPointerKey {
    fn extract(&self, message: &Message) -> Option<CorrelationKey> {
        message.body.pointer(&self.0).and_then(key_from_value)
    }
}
