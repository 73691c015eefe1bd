//! Transcript record and content-block classification
//!
//! The trimmer and the analyzer classify lines and blocks identically and
//! disagree only on what to do with the classification; keeping the
//! dispatch here is what makes the analyzer's "trimmable bytes" line up
//! with the trimmer's "bytes removed".
//!
//! Records are open JSON objects. Rather than deserializing into closed
//! structs (which would drop fields the host adds later), classification
//! dispatches on `type`/`role` over `serde_json::Value` and rewrites happen
//! in place.

use serde_json::Value;

/// Top-level record kinds the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `role == "user"` or `type` in {user, human}
    User,
    /// `role == "assistant"` or `type == "assistant"`
    Assistant,
    /// `type == "file-history-snapshot"`
    FileHistory,
    /// `type == "queue-operation"`
    QueueOperation,
    /// `type == "summary"`, or `type == "system"` with `subtype == "compact_boundary"`
    CompactionMarker,
    /// Everything else; preserved verbatim
    Other,
}

/// Content block kinds within a message's `content` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Image,
    Unknown,
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Classify a parsed transcript line.
pub fn classify_record(value: &Value) -> RecordKind {
    let record_type = str_field(value, "type");

    match record_type {
        Some("file-history-snapshot") => return RecordKind::FileHistory,
        Some("queue-operation") => return RecordKind::QueueOperation,
        Some("summary") => return RecordKind::CompactionMarker,
        Some("system") if str_field(value, "subtype") == Some("compact_boundary") => {
            return RecordKind::CompactionMarker;
        }
        _ => {}
    }

    let role = str_field(value, "role").or(record_type);
    match role {
        Some("user") | Some("human") => RecordKind::User,
        Some("assistant") => RecordKind::Assistant,
        _ => RecordKind::Other,
    }
}

/// Classify a content block by its `type` field.
pub fn classify_block(block: &Value) -> BlockKind {
    match str_field(block, "type") {
        Some("text") => BlockKind::Text,
        Some("thinking") => BlockKind::Thinking,
        Some("tool_use") => BlockKind::ToolUse,
        Some("tool_result") => BlockKind::ToolResult,
        Some("image") => BlockKind::Image,
        _ => BlockKind::Unknown,
    }
}

/// A message's payload is at `message.content` or (alternate format)
/// top-level `content`.
pub fn content_value(record: &Value) -> Option<&Value> {
    record
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| record.get("content"))
}

/// Mutable access to the block array, wherever it lives.
pub fn content_blocks_mut(record: &mut Value) -> Option<&mut Vec<Value>> {
    let message_has_array = matches!(
        record.get("message").and_then(|m| m.get("content")),
        Some(Value::Array(_))
    );
    if message_has_array {
        record
            .get_mut("message")
            .and_then(|m| m.get_mut("content"))
            .and_then(|c| c.as_array_mut())
    } else {
        record.get_mut("content").and_then(|c| c.as_array_mut())
    }
}

/// Usage metadata at `message.usage` or top-level `usage`.
pub fn usage_value(record: &Value) -> Option<&Value> {
    record
        .get("message")
        .and_then(|m| m.get("usage"))
        .filter(|u| u.is_object())
        .or_else(|| record.get("usage").filter(|u| u.is_object()))
}

/// Delete any usage object; returns whether one was removed.
pub fn strip_usage(record: &mut Value) -> bool {
    let mut removed = false;
    if let Some(Value::Object(message)) = record.get_mut("message") {
        removed |= message.shift_remove("usage").is_some();
    }
    if let Value::Object(map) = record {
        removed |= map.shift_remove("usage").is_some();
    }
    removed
}

/// API-reported total input for an assistant line: `input_tokens +
/// cache_creation_input_tokens + cache_read_input_tokens`, or None when
/// `input_tokens` is absent.
pub fn api_input_tokens(record: &Value) -> Option<u64> {
    let usage = usage_value(record)?;
    usage.get("input_tokens")?.as_u64()?;
    let field = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    Some(
        field("input_tokens")
            + field("cache_creation_input_tokens")
            + field("cache_read_input_tokens"),
    )
}

/// Serialized byte length of a JSON value.
pub fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Summary text of a compaction marker: the `summary` field, or a plain
/// string `content`.
pub fn summary_text(record: &Value) -> Option<&str> {
    str_field(record, "summary").or_else(|| record.get("content").and_then(|c| c.as_str()))
}

/// Recursive text length of a `tool_result`'s `content` value.
pub fn tool_result_text_len(content: &Value) -> usize {
    match content {
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(tool_result_text_len).sum(),
        Value::Object(_) => {
            if let Some(text) = content.get("text").and_then(|t| t.as_str()) {
                text.len()
            } else if let Some(inner) = content.get("content") {
                tool_result_text_len(inner)
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// Semantic character count of one line: `text.text`, thinking text,
/// serialized `tool_use.input`, recursive `tool_result.content` text, or a
/// plain string content. Image payloads and JSON overhead do not count.
pub fn semantic_chars(record: &Value) -> usize {
    let Some(content) = content_value(record) else {
        return 0;
    };

    match content {
        Value::String(s) => s.len(),
        Value::Array(blocks) => blocks.iter().map(block_semantic_chars).sum(),
        _ => 0,
    }
}

fn block_semantic_chars(block: &Value) -> usize {
    match classify_block(block) {
        BlockKind::Text => block
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.len())
            .unwrap_or(0),
        // The host writes the text under `thinking`; older records use `text`.
        BlockKind::Thinking => block
            .get("thinking")
            .or_else(|| block.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.len())
            .unwrap_or(0),
        BlockKind::ToolUse => block.get("input").map(serialized_len).unwrap_or(0),
        BlockKind::ToolResult => block.get("content").map(tool_result_text_len).unwrap_or(0),
        BlockKind::Image | BlockKind::Unknown => 0,
    }
}
