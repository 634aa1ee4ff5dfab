//! Tagged-union decoder for the backend's heterogeneous response shapes.
//!
//! The store answers list calls with a bare array, a wrapped object with a
//! count, or either of those nested under a `data` key. The decoder keeps
//! that mess out of the lifecycle managers.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "cards", alias = "records")]
        items: Vec<T>,
        #[serde(default)]
        count: Option<u64>,
    },
    Nested {
        data: Box<ListEnvelope<T>>,
    },
}

impl<T> ListEnvelope<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Bare(items) => items,
            ListEnvelope::Wrapped { items, .. } => items,
            ListEnvelope::Nested { data } => data.into_items(),
        }
    }
}

pub fn decode_list<T: DeserializeOwned>(operation: &str, raw: Value) -> CoreResult<Vec<T>> {
    let envelope: ListEnvelope<T> =
        serde_json::from_value(raw).map_err(|err| CoreError::RemoteUnavailable {
            operation: operation.to_string(),
            message: format!("undecodable list response: {err}"),
        })?;
    Ok(envelope.into_items())
}

/// Single-object responses may also hide under `data`.
pub fn unwrap_data(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
