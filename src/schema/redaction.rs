use serde_json::{Map, Value};

/// Replacement text for sensitive values.
pub const REDACTED: &str = "***hidden***";

const SENSITIVE_MARKERS: [&str; 5] = ["password", "token", "secret", "key", "api_key"];

/// Hides every top-level field whose name contains a sensitive marker,
/// compared case-insensitively.
pub fn redact(mut map: Map<String, Value>) -> Map<String, Value> {
    for (name, value) in map.iter_mut() {
        if is_sensitive(name) {
            *value = Value::String(REDACTED.to_string());
        }
    }

    map
}

fn is_sensitive(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    SENSITIVE_MARKERS
        .iter()
        .any(|marker| field.contains(marker))
}
