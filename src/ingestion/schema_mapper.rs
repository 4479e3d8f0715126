//! Schema Mapper - raw message events into fixed-shape warehouse rows
//!
//! Mapping is total: malformed or missing optional fields become null, and
//! missing required fields are passed through as null for the sink's schema
//! to reject. Only `event_id`, `org_id` and `ingestion_timestamp` are always
//! populated, and all three come from the server rather than the input.

use crate::ingestion::RawEvent;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Epoch values below this are seconds, at or above it milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Accepted input keys per output column, in lookup order
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("message_id", &["message_id", "messageId"]),
    ("conversation_id", &["conversation_id", "conversationId"]),
    ("message_timestamp", &["message_timestamp", "messageTimestamp", "timestamp"]),
    ("user_id", &["user_id", "userId"]),
    ("sender_number", &["sender_number", "senderNumber"]),
    ("sender_type", &["sender_type", "senderType"]),
    ("ack_status", &["ack_status", "ackStatus"]),
    ("message_text", &["message_text", "messageText"]),
    ("file_url", &["file_url", "fileUrl"]),
    ("is_broadcast", &["is_broadcast", "isBroadcast"]),
    ("sentiment_score", &["sentiment_score", "sentimentScore"]),
    ("special_data", &["special_data", "specialData"]),
];

/// Row shape of the `message_events` table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub event_id: String,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub org_id: String,
    /// Canonical UTC timestamp; empty when the input date could not be parsed
    pub message_timestamp: Option<String>,
    pub ingestion_timestamp: String,
    pub user_id: Option<String>,
    pub sender_number: Option<String>,
    pub sender_type: Option<String>,
    pub ack_status: Option<String>,
    pub message_text: Option<String>,
    pub word_count: Option<u64>,
    pub file_url: Option<String>,
    pub is_broadcast: Option<bool>,
    pub sentiment_score: Option<f64>,
    /// Nested payload kept as an opaque JSON string
    pub special_data: Option<String>,
}

/// Schema Mapper
pub struct SchemaMapper;

impl SchemaMapper {
    pub fn new() -> Self {
        Self
    }

    /// Map one raw event, stamping it with the current wall-clock time
    pub fn map(&self, raw: &RawEvent, org_id: &str) -> NormalizedRow {
        self.map_at(raw, org_id, Utc::now())
    }

    /// Map one raw event with an explicit ingestion time
    pub fn map_at(&self, raw: &RawEvent, org_id: &str, now: DateTime<Utc>) -> NormalizedRow {
        let message_text = field(raw, "message_text").and_then(as_text);
        let word_count = message_text.as_deref().and_then(word_count);

        NormalizedRow {
            // Never taken from input: repeated ingests must not collide
            event_id: format!("{}-{}", org_id, Uuid::new_v4()),
            message_id: field(raw, "message_id").and_then(as_text),
            conversation_id: field(raw, "conversation_id").and_then(as_text),
            org_id: org_id.to_string(),
            message_timestamp: field(raw, "message_timestamp")
                .map(|v| parse_timestamp(v).map(format_timestamp).unwrap_or_default()),
            ingestion_timestamp: format_timestamp(now),
            user_id: field(raw, "user_id").and_then(as_text),
            sender_number: field(raw, "sender_number").and_then(as_text),
            sender_type: field(raw, "sender_type").and_then(as_text),
            ack_status: field(raw, "ack_status").and_then(as_text),
            message_text,
            word_count,
            file_url: field(raw, "file_url").and_then(as_text),
            is_broadcast: field(raw, "is_broadcast").and_then(as_bool),
            sentiment_score: field(raw, "sentiment_score").and_then(as_float),
            special_data: field(raw, "special_data").and_then(|v| serde_json::to_string(v).ok()),
        }
    }
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// First non-null value among the aliases of `column`
pub fn field<'a>(raw: &'a RawEvent, column: &str) -> Option<&'a Value> {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);

    aliases
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

/// Whitespace-separated word count; None for blank text
pub fn word_count(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.split_whitespace().count() as u64)
}

/// Parse the date representations clients send
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(float_epoch))
            .and_then(from_epoch),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

/// Floats outside the i64 range are unparseable rather than saturated
fn float_epoch(value: f64) -> Option<i64> {
    if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() < EPOCH_MILLIS_THRESHOLD as u64 {
        DateTime::from_timestamp(value, 0)
    } else {
        DateTime::from_timestamp_millis(value)
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: Value) -> RawEvent {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_org_and_event_id() {
        let row = SchemaMapper::new().map(&raw(json!({"message_id": "m1"})), "org1");
        assert_eq!(row.org_id, "org1");
        assert!(row.event_id.starts_with("org1-"));
        assert_eq!(row.event_id.len(), "org1-".len() + 36);
    }

    #[test]
    fn test_event_id_ignores_input() {
        let row = SchemaMapper::new().map(&raw(json!({"event_id": "client-supplied"})), "org1");
        assert_ne!(row.event_id, "client-supplied");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("hi there"), Some(2));
        assert_eq!(word_count("  hi \t there\n  friend "), Some(3));
        assert_eq!(word_count("   "), None);
        assert_eq!(word_count(""), None);
    }

    #[test]
    fn test_word_count_follows_message_text() {
        let mapper = SchemaMapper::new();
        assert_eq!(mapper.map(&raw(json!({"message_text": "a b c"})), "o").word_count, Some(3));
        assert_eq!(mapper.map(&raw(json!({"message_text": " \n "})), "o").word_count, None);
        assert_eq!(mapper.map(&raw(json!({"message_text": null})), "o").word_count, None);
        assert_eq!(mapper.map(&raw(json!({})), "o").word_count, None);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = "2024-03-05T10:20:30.000Z";
        for input in [
            json!("2024-03-05T10:20:30Z"),
            json!("2024-03-05T12:20:30+02:00"),
            json!("2024-03-05 10:20:30"),
            json!(1709634030),
            json!(1709634030000i64),
            json!("1709634030"),
        ] {
            let parsed = parse_timestamp(&input).map(format_timestamp);
            assert_eq!(parsed.as_deref(), Some(expected), "input {}", input);
        }
        assert_eq!(
            parse_timestamp(&json!("2024-03-05")).map(format_timestamp).as_deref(),
            Some("2024-03-05T00:00:00.000Z")
        );
    }

    #[test]
    fn test_extreme_epochs_are_unparseable() {
        let mapper = SchemaMapper::new();
        for input in [
            json!(i64::MIN),
            json!("-9223372036854775808"),
            json!(-1e300),
            json!(1e300),
            json!(i64::MAX),
        ] {
            assert_eq!(parse_timestamp(&input), None, "input {}", input);
            let row = mapper.map(&raw(json!({"message_timestamp": input})), "o");
            assert_eq!(row.message_timestamp.as_deref(), Some(""));
        }
    }

    #[test]
    fn test_malformed_timestamp_becomes_empty() {
        let mapper = SchemaMapper::new();
        let row = mapper.map(&raw(json!({"message_timestamp": "yesterday-ish"})), "o");
        assert_eq!(row.message_timestamp.as_deref(), Some(""));

        let row = mapper.map(&raw(json!({})), "o");
        assert_eq!(row.message_timestamp, None);
    }

    #[test]
    fn test_ingestion_timestamp_from_clock() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let row = SchemaMapper::new().map_at(
            &raw(json!({"ingestion_timestamp": "1999-01-01T00:00:00Z"})),
            "o",
            now,
        );
        assert_eq!(row.ingestion_timestamp, "2025-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_renames_and_coercions() {
        let row = SchemaMapper::new().map(
            &raw(json!({
                "messageId": 42,
                "conversationId": "c-1",
                "senderNumber": "+15550100",
                "ackStatus": "read",
                "isBroadcast": "true",
                "sentimentScore": "0.25",
                "fileUrl": "https://files/x.png",
                "specialData": {"buttons": [1, 2]}
            })),
            "o",
        );
        assert_eq!(row.message_id.as_deref(), Some("42"));
        assert_eq!(row.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(row.sender_number.as_deref(), Some("+15550100"));
        assert_eq!(row.ack_status.as_deref(), Some("read"));
        assert_eq!(row.is_broadcast, Some(true));
        assert_eq!(row.sentiment_score, Some(0.25));
        assert_eq!(row.file_url.as_deref(), Some("https://files/x.png"));
        assert_eq!(row.special_data.as_deref(), Some(r#"{"buttons":[1,2]}"#));
    }

    #[test]
    fn test_malformed_optionals_are_null() {
        let row = SchemaMapper::new().map(
            &raw(json!({
                "user_id": {"nested": true},
                "is_broadcast": "maybe",
                "sentiment_score": [1],
                "message_text": 17
            })),
            "o",
        );
        assert_eq!(row.user_id, None);
        assert_eq!(row.is_broadcast, None);
        assert_eq!(row.sentiment_score, None);
        assert_eq!(row.message_text.as_deref(), Some("17"));
        assert_eq!(row.word_count, Some(1));
    }

    #[test]
    fn test_snake_case_wins_over_alias() {
        let event = raw(json!({"message_id": "snake", "messageId": "camel"}));
        assert_eq!(field(&event, "message_id"), Some(&json!("snake")));

        let event = raw(json!({"message_id": null, "messageId": "camel"}));
        assert_eq!(field(&event, "message_id"), Some(&json!("camel")));
    }
}
