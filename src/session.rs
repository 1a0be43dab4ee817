//! Parses a JSONL session transcript into `(role, text, message_id,
//! timestamp)` tuples ready for chunking.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::store::Role;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMessage {
    pub message_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

const TEXT_BLOCK_TYPES: &[&str] = &["text", "thinking", "reasoning"];

/// Parses a full transcript, one JSON object per line, into extracted
/// messages. Lines that fail to parse or aren't `type: "message"` events
/// with a recognized role are skipped, not treated as errors — a transcript
/// writer crash mid-line should not abort an entire sync.
pub fn extract_messages(jsonl: &str) -> Vec<ExtractedMessage> {
    let mut out = Vec::new();
    let mut index = 0usize;

    for line in jsonl.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(message) = event.get("message") else {
            continue;
        };
        let Some(role) = message.get("role").and_then(Value::as_str).and_then(parse_role) else {
            continue;
        };

        let text = extract_text(message.get("content"));
        let timestamp = event
            .get("timestamp")
            .and_then(Value::as_f64)
            .map(timestamp_from_epoch_seconds)
            .or_else(|| {
                message
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            });

        out.push(ExtractedMessage {
            message_id: format!("msg-{index:08}"),
            role,
            text,
            timestamp,
        });
        index += 1;
    }

    out
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

fn timestamp_from_epoch_seconds(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0).single().unwrap_or_else(Utc::now)
}

/// Extracts and whitespace-collapses text from either a plain string
/// `content` field or an array of content blocks.
fn extract_text(content: Option<&Value>) -> String {
    let pieces: Vec<String> = match content {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| {
                let block_type = block.get("type").and_then(Value::as_str)?;
                if !TEXT_BLOCK_TYPES.contains(&block_type) {
                    return None;
                }
                block
                    .get("text")
                    .or_else(|| block.get(block_type))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect(),
        _ => Vec::new(),
    };
    collapse_whitespace(&pieces.join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builds the normalized basis the file-level content hash is computed
/// over: one line per message, prefixed by its role label.
pub fn build_transcript_basis(messages: &[ExtractedMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}
