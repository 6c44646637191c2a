//! Normalisation of REST list responses.
//!
//! List endpoints answer either with a bare JSON array or with one of
//! several paginated envelopes:
//!
//! ```text
//! [ … ]
//! { "results": [ … ], "count": 10, "next": null }
//! { "data": [ … ] }
//! { "items": [ … ] }
//! { "notifications": [ … ] }
//! { "messages": [ … ] }
//! { "data": { "results": [ … ] } }
//! ```
//!
//! [`normalize_list`] flattens all of them to a `Vec<T>` in server order.

use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;

/// Envelope keys that may hold the list, in lookup order.
const LIST_KEYS: [&str; 5] = ["results", "data", "items", "notifications", "messages"];

/// Extract and deserialize the list carried by `body`.
pub fn normalize_list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, serde_json::Error> {
    let list = extract(body, 0)?;
    serde_json::from_value(Value::Array(list))
}

fn extract(body: Value, depth: usize) -> Result<Vec<Value>, serde_json::Error> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) if depth < 2 => {
            for key in LIST_KEYS {
                if let Some(inner) = map.remove(key) {
                    if inner.is_array() || inner.is_object() {
                        return extract(inner, depth + 1);
                    }
                }
            }
            Err(serde_json::Error::custom("no list found in response envelope"))
        }
        other => Err(serde_json::Error::custom(format!(
            "expected a list or list envelope, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "nested object",
    }
}
