//! JSON payload helpers used to build task payloads.

use serde_json::Value;

/// Fields describing an outcome; never forwarded to the next task.
pub const OUTCOME_FIELDS: [&str; 3] = ["status", "result", "message"];

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key by key, arrays concatenate, anything else in the
/// overlay replaces the base value.
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items.iter().cloned());
        }
        (base, overlay) => {
            if !overlay.is_null() {
                *base = overlay.clone();
            }
        }
    }
}

/// Remove top-level outcome fields from an object.
pub fn strip_outcome_fields(value: &mut Value) {
    if let Value::Object(map) = value {
        for field in OUTCOME_FIELDS {
            map.remove(field);
        }
    }
}

/// Set a top-level string field, turning non-objects into objects.
pub fn set_str(value: &mut Value, key: &str, field: &str) {
    if !value.is_object() {
        *value = Value::Object(Default::default());
    }
    if let Value::Object(map) = value {
        map.insert(key.to_string(), Value::String(field.to_string()));
    }
}
