//! Response unwrapping.
//!
//! The extraction endpoints evolved independently and nest their payloads
//! under inconsistent envelope keys. Each step declares the key variants it
//! accepts; the rest is a shared heuristic instead of per-endpoint branches.

use crate::config::StepDescriptor;
use serde_json::Value;

/// Extract the meaningful payload from a raw endpoint response.
///
/// Probes the step's candidate keys in declared order and returns the first
/// present non-null value. If none match but the response already has an
/// array-valued field, it is assumed to be categorized tag data and returned
/// as-is. Anything else collapses to the step's empty shape.
pub fn unwrap_response(raw: &Value, step: &StepDescriptor) -> Value {
    let fallback = [step.key.clone()];
    let candidates: &[String] = if step.response_keys.is_empty() {
        &fallback
    } else {
        &step.response_keys
    };

    for key in candidates {
        if let Some(v) = raw.get(key) {
            if !v.is_null() {
                return v.clone();
            }
        }
    }

    if let Some(obj) = raw.as_object() {
        if obj.values().any(Value::is_array) {
            return raw.clone();
        }
    }

    step.shape.empty_value()
}
