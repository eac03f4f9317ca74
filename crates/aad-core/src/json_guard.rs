// SPDX-License-Identifier: MIT OR Apache-2.0
//! Guardrails for untrusted JSON payloads (config values, action specs, IR).

use serde_json::Value;

/// Limits used to validate JSON payloads before they are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonGuardLimits {
    /// Maximum allowed depth of nested objects/arrays.
    pub max_depth: usize,
    /// Maximum allowed UTF-8 byte size after JSON serialization.
    pub max_size_bytes: usize,
}

impl JsonGuardLimits {
    /// Construct new JSON guard limits.
    #[must_use]
    pub const fn new(max_depth: usize, max_size_bytes: usize) -> Self {
        Self {
            max_depth,
            max_size_bytes,
        }
    }
}

/// Validates that `value` does not exceed the given depth/size limits.
///
/// Returns a vector of validation errors; empty means the payload passed.
#[must_use]
pub fn validate_json(value: &Value, limits: JsonGuardLimits) -> Vec<String> {
    let mut errors = Vec::new();

    if exceeds_depth(value, limits.max_depth) {
        errors.push(format!(
            "value exceeds maximum nesting depth of {}",
            limits.max_depth
        ));
    }

    let size = value.to_string().len();
    if size > limits.max_size_bytes {
        errors.push(format!(
            "value exceeds maximum size of {} bytes (got {size})",
            limits.max_size_bytes
        ));
    }

    errors
}

fn exceeds_depth(value: &Value, max_depth: usize) -> bool {
    fn depth_of(value: &Value) -> usize {
        match value {
            Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
            Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
            _ => 0,
        }
    }
    depth_of(value) > max_depth
}

/// Checks that a string field is non-empty and within a maximum length.
///
/// Returns `Some(error_message)` on failure, or `None` when valid.
#[must_use]
pub fn check_bounded_text(value: &str, field: &str, max_len: usize) -> Option<String> {
    if value.is_empty() {
        return Some(format!("{field} must not be empty"));
    }
    if value.len() > max_len {
        return Some(format!(
            "{field} exceeds maximum length of {max_len} characters"
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_small_value_passes() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        assert!(validate_json(&v, JsonGuardLimits::new(10, 1_000_000)).is_empty());
    }

    #[test]
    fn deep_value_rejected() {
        let v = json!({"a": {"b": {"c": {"d": 1}}}});
        let errs = validate_json(&v, JsonGuardLimits::new(2, 1_000_000));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn oversized_value_rejected() {
        let v = json!({"a": "x".repeat(100)});
        let errs = validate_json(&v, JsonGuardLimits::new(10, 10));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn bounded_text_rejects_empty() {
        assert_eq!(
            check_bounded_text("", "title", 10),
            Some("title must not be empty".to_string())
        );
    }

    #[test]
    fn bounded_text_rejects_too_long() {
        assert!(check_bounded_text(&"x".repeat(11), "title", 10).is_some());
    }

    #[test]
    fn bounded_text_accepts_in_range() {
        assert!(check_bounded_text("hi", "title", 10).is_none());
    }
}
