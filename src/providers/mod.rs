//! Provider system for collecting normalized usage entries from AI coding tools

mod claude;
mod codex;
mod cursor;
mod traits;

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use cursor::CursorProvider;
pub use traits::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider identifier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Claude,
    Codex,
    Cursor,
}

impl ProviderId {
    pub fn all() -> Vec<ProviderId> {
        vec![ProviderId::Claude, ProviderId::Codex, ProviderId::Cursor]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Claude => "claude",
            ProviderId::Codex => "codex",
            ProviderId::Cursor => "cursor",
        }
    }
}

/// One normalized, priced record of token consumption for a single model call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderId,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// Parse a provider-native timestamp value.
///
/// Logs carry RFC3339 strings, epoch seconds as numbers, or epoch
/// milliseconds as all-digit strings depending on the provider era.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp_str(text),
        Value::Number(number) => {
            let raw = number
                .as_i64()
                .or_else(|| number.as_f64().map(|n| n as i64))?;
            from_epoch(raw, raw > 1_000_000_000_000)
        }
        _ => None,
    }
}

pub(crate) fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        let value = trimmed.parse::<i64>().ok()?;
        return from_epoch(value, trimmed.len() > 10);
    }
    None
}

fn from_epoch(value: i64, millis: bool) -> Option<DateTime<Utc>> {
    let (secs, nanos) = if millis {
        (value / 1000, (value % 1000).unsigned_abs() as u32 * 1_000_000)
    } else {
        (value, 0)
    };
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_rfc3339_timestamps_to_utc() {
        let parsed = parse_timestamp(&json!("2025-01-10T12:30:00+02:00")).expect("timestamp");
        assert_eq!(parsed.to_rfc3339(), "2025-01-10T10:30:00+00:00");
    }

    #[test]
    fn parses_epoch_millis_strings() {
        let parsed = parse_timestamp(&json!("1736510400000")).expect("timestamp");
        assert_eq!(parsed.timestamp(), 1_736_510_400);
    }

    #[test]
    fn parses_epoch_second_numbers() {
        let parsed = parse_timestamp(&json!(1_736_510_400)).expect("timestamp");
        assert_eq!(parsed.timestamp(), 1_736_510_400);
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp(&json!("next tuesday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }
}
