//! Server-pushed ARI events

use crate::{
    constants::EVENT_TYPE_FIELD,
    error::{AriError, AriResult},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One event received on the event stream.
///
/// Wraps the decoded JSON document; the `type` field is validated at parse
/// time so [`event_type`](Self::event_type) is infallible.
#[derive(Debug, Clone, PartialEq)]
pub struct AriEvent {
    event_type: String,
    document: Value,
}

impl AriEvent {
    /// Parse a raw payload. Fails if it is not JSON, not an object, or has no
    /// string `type` field.
    pub fn parse(raw: &str) -> AriResult<Self> {
        let document: Value = serde_json::from_str(raw)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> AriResult<Self> {
        let event_type = document
            .get(EVENT_TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| AriError::missing_field(EVENT_TYPE_FIELD))?
            .to_string();
        Ok(Self {
            event_type,
            document,
        })
    }

    /// Event type name, e.g. `StasisStart`
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Stasis application the event was delivered for
    pub fn application(&self) -> Option<&str> {
        self.get_str("application")
    }

    /// Server timestamp as sent (ISO 8601 text)
    pub fn timestamp(&self) -> Option<&str> {
        self.get_str("timestamp")
    }

    /// Top-level field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.document.get(field)
    }

    /// Nested field, e.g. `&["channel", "id"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.document, |value, key| value.get(*key))
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Deserialize the whole document into a typed model
    pub fn deserialize<T: DeserializeOwned>(&self) -> AriResult<T> {
        Ok(T::deserialize(&self.document)?)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}
