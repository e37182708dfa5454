//! JSON merge-patch (RFC 7396).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, Result};

pub fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(changes) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(map) = target {
                for (key, value) in changes {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        merge(map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// Apply `patch` to the editable projection `current` and read the result
/// back. Fields outside the projection surface as validation errors.
pub fn apply<T: Serialize + DeserializeOwned>(current: &T, patch: &Value) -> Result<T> {
    if !patch.is_object() {
        return Err(AppError::validation("a merge-patch document must be a JSON object"));
    }
    let mut doc = serde_json::to_value(current)?;
    merge(&mut doc, patch);
    serde_json::from_value(doc).map_err(|e| AppError::validation(format!("invalid patch: {e}")))
}
