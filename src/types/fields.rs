// src/types/fields.rs
//! Field lookup over loosely-shaped JSON objects.
//!
//! Backend versions disagree on field names, so every lookup takes an ordered
//! list of candidates and returns the first usable value.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

pub const SENDER_ID_FIELDS: &[&str] = &["senderId", "fromUserId", "userFromId", "senderID", "userId"];
pub const RECEIVER_ID_FIELDS: &[&str] = &["receiverId", "toUserId", "userToId", "receiverID"];
pub const MESSAGE_ID_FIELDS: &[&str] = &["messageId"];
pub const FALLBACK_ID_FIELDS: &[&str] = &["id"];
pub const SENT_AT_FIELDS: &[&str] = &["sentAt"];
pub const DISPLAY_NAME_FIELDS: &[&str] = &["senderFullName", "senderName", "companyName"];
pub const MESSAGE_TEXT_FIELDS: &[&str] = &["messageText", "content", "text"];
pub const AVATAR_FIELDS: &[&str] = &["senderAvatar", "avatarUrl", "avatar", "companyLogo"];
pub const COUNTERPART_FALLBACK_FIELDS: &[&str] = &["companyId", "userId"];

/// Identifier as a string; JSON numbers count, blank strings don't.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First candidate field holding a usable identifier
pub fn first_id(map: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(id_string)
}

/// First candidate field holding non-empty text
pub fn first_text(map: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// Raw representation of a candidate field, for building composite keys
pub fn first_raw(map: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}

/// Parse a server timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, naive ISO-8601 (read as UTC), and integer epoch millis.
pub fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// First candidate field that parses as a timestamp
pub fn first_timestamp_ms(map: &Map<String, Value>, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_first_id_prefers_candidate_order() {
        let map = obj(json!({"userId": "9", "fromUserId": 4}));
        assert_eq!(first_id(&map, SENDER_ID_FIELDS), Some("4".to_string()));
    }

    #[test]
    fn test_first_id_skips_blank_and_null() {
        let map = obj(json!({"senderId": "  ", "fromUserId": null, "senderID": "12"}));
        assert_eq!(first_id(&map, SENDER_ID_FIELDS), Some("12".to_string()));
    }

    #[test]
    fn test_first_text_skips_empty() {
        let map = obj(json!({"messageText": "", "content": "hello"}));
        assert_eq!(first_text(&map, MESSAGE_TEXT_FIELDS), Some("hello".to_string()));
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(
            timestamp_ms(&json!("2024-05-01T10:00:00Z")),
            Some(1_714_557_600_000)
        );
        assert_eq!(
            timestamp_ms(&json!("2024-05-01T10:00:00.250")),
            Some(1_714_557_600_250)
        );
        assert_eq!(timestamp_ms(&json!(1_714_557_600_000i64)), Some(1_714_557_600_000));
        assert_eq!(timestamp_ms(&json!("yesterday")), None);
        assert_eq!(timestamp_ms(&Value::Null), None);
    }
}
