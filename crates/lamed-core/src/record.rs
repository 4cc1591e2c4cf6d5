//! Field accessors for loosely-typed domain records.
//!
//! Records come straight from the realtime database, so every field may be
//! missing, empty, or of an unexpected JSON type. These helpers normalize
//! the common cases and return `None` for everything else.

use serde_json::Value;

/// Read a textual field. Empty or whitespace-only strings count as missing;
/// numbers are accepted and rendered as text (some clients store numeric ids).
pub fn text(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present textual field among `keys`.
pub fn first_text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(record, key))
}

/// Boolean flag. Accepts `true` and the string `"true"`.
pub fn flag(record: &Value, key: &str) -> bool {
    match record.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Epoch-millisecond timestamp, stored either as a number or a numeric string.
pub fn millis(record: &Value, key: &str) -> Option<i64> {
    match record.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_treats_blank_as_missing() {
        let record = json!({"a": "  ", "b": "x", "c": 42, "d": null});
        assert_eq!(text(&record, "a"), None);
        assert_eq!(text(&record, "b").as_deref(), Some("x"));
        assert_eq!(text(&record, "c").as_deref(), Some("42"));
        assert_eq!(text(&record, "d"), None);
        assert_eq!(text(&record, "missing"), None);
    }

    #[test]
    fn test_first_text_order() {
        let record = json!({"doctorName": "Abel", "Doctor": "Sara"});
        assert_eq!(first_text(&record, &["Doctor", "doctorName"]).as_deref(), Some("Sara"));
        assert_eq!(first_text(&record, &["nope", "doctorName"]).as_deref(), Some("Abel"));
    }

    #[test]
    fn test_flag_and_millis() {
        let record = json!({"sent": true, "s2": "TRUE", "ts": 1700000000000_i64, "ts2": "1700000000001", "bad": "soon"});
        assert!(flag(&record, "sent"));
        assert!(flag(&record, "s2"));
        assert!(!flag(&record, "missing"));
        assert_eq!(millis(&record, "ts"), Some(1_700_000_000_000));
        assert_eq!(millis(&record, "ts2"), Some(1_700_000_000_001));
        assert_eq!(millis(&record, "bad"), None);
    }
}
