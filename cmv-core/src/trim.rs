//! Two-pass streaming transcript trimmer
//!
//! Rewrites a JSONL transcript into a trimmed copy, removing mechanical
//! overhead (oversized tool results, thinking signatures, file-history
//! snapshots, dead pre-compaction content) while preserving conversation
//! semantics byte-for-byte.
//!
//! Pass 1 scans for the last compaction marker and collects the ids of
//! tool_use blocks that live on lines before it. Pass 2 rewrites: lines
//! before the marker are dropped, surviving lines have the removal taxonomy
//! applied, and tool_result blocks that reference a dropped tool_use are
//! stripped so the upstream API never sees an orphaned result.
//!
//! Malformed JSON lines pass through verbatim; empty lines are skipped
//! silently. The destination is published by temp-write-then-rename, so a
//! partial output is never visible under its final name.

use crate::error::Result;
use crate::fsutil::{self, TempPathGuard};
use crate::transcript::record::{
    classify_block, classify_record, content_blocks_mut, serialized_len, strip_usage, BlockKind,
    RecordKind,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Default stub threshold in chars, applied to tool result and tool input
/// lengths alike.
pub const DEFAULT_STUB_THRESHOLD: usize = 500;

/// Floor for configurable thresholds.
pub const MIN_STUB_THRESHOLD: usize = 50;

/// Tools whose inputs carry whole file payloads; their payload fields are
/// stubbed individually before the generic per-key rule would apply.
const WRITE_TOOLS: [&str; 4] = ["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Payload fields of the write tools.
const WRITE_TOOL_PAYLOAD_FIELDS: [&str; 4] = ["content", "old_string", "new_string", "new_source"];

/// Input fields that are never stubbed; losing them would break replay and
/// readability for a handful of bytes.
const PRESERVED_INPUT_FIELDS: [&str; 13] = [
    "file_path",
    "notebook_path",
    "command",
    "description",
    "pattern",
    "path",
    "url",
    "skill",
    "args",
    "replace_all",
    "edit_mode",
    "cell_type",
    "cell_id",
];

/// Options for a trim run.
#[derive(Debug, Clone, Copy)]
pub struct TrimOptions {
    /// Stub threshold in chars; clamped to [`MIN_STUB_THRESHOLD`].
    pub stub_threshold: usize,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            stub_threshold: DEFAULT_STUB_THRESHOLD,
        }
    }
}

impl TrimOptions {
    /// Threshold with the floor applied.
    pub fn effective_threshold(&self) -> usize {
        self.stub_threshold.max(MIN_STUB_THRESHOLD)
    }
}

/// Byte-accurate accounting of one trim run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrimMetrics {
    pub original_bytes: u64,
    pub trimmed_bytes: u64,

    // Removal counters
    pub tool_results_stubbed: usize,
    pub signatures_stripped: usize,
    pub file_history_removed: usize,
    pub images_stripped: usize,
    pub tool_use_inputs_stubbed: usize,
    pub pre_compaction_lines_skipped: usize,
    pub queue_operations_removed: usize,

    // Preservation counters
    pub user_messages: usize,
    pub assistant_responses: usize,
    pub tool_use_requests: usize,
}

impl TrimMetrics {
    /// Size reduction as a percentage of the original.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (self.original_bytes.saturating_sub(self.trimmed_bytes)) as f64
            / self.original_bytes as f64
            * 100.0
    }

    /// True when nothing was removed or rewritten.
    pub fn is_noop(&self) -> bool {
        self.tool_results_stubbed == 0
            && self.signatures_stripped == 0
            && self.file_history_removed == 0
            && self.images_stripped == 0
            && self.tool_use_inputs_stubbed == 0
            && self.pre_compaction_lines_skipped == 0
            && self.queue_operations_removed == 0
    }
}

/// Result of the scan pass.
struct ScanResult {
    /// Line index of the last compaction marker, if any.
    last_compaction_line: Option<usize>,
    /// Ids of tool_use blocks on lines before the last compaction marker.
    skipped_tool_use_ids: HashSet<String>,
}

/// Trim `source` into `destination`, returning byte-accurate metrics.
pub fn trim(source: &Path, destination: &Path, options: &TrimOptions) -> Result<TrimMetrics> {
    let threshold = options.effective_threshold();
    let scan = scan_pass(source)?;
    let mut metrics = TrimMetrics {
        // Stat up front: source and destination may be the same path when
        // trimming in place.
        original_bytes: std::fs::metadata(source)?.len(),
        ..TrimMetrics::default()
    };

    let temp = fsutil::sibling_temp_path(destination);
    let guard = TempPathGuard::new(temp.clone());

    {
        let reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(File::create(&temp)?);

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(last) = scan.last_compaction_line {
                if index < last {
                    metrics.pre_compaction_lines_skipped += 1;
                    continue;
                }
            }

            let Ok(mut value) = serde_json::from_str::<Value>(&line) else {
                // Malformed lines pass through untouched.
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                continue;
            };

            let kind = classify_record(&value);
            match kind {
                RecordKind::FileHistory => {
                    metrics.file_history_removed += 1;
                    continue;
                }
                RecordKind::QueueOperation => {
                    metrics.queue_operations_removed += 1;
                    continue;
                }
                RecordKind::User | RecordKind::Assistant => {
                    let changed = rewrite_message(
                        &mut value,
                        threshold,
                        &scan.skipped_tool_use_ids,
                        &mut metrics,
                    );
                    match kind {
                        RecordKind::User => metrics.user_messages += 1,
                        RecordKind::Assistant => metrics.assistant_responses += 1,
                        _ => unreachable!(),
                    }
                    if changed {
                        writer.write_all(serde_json::to_string(&value)?.as_bytes())?;
                    } else {
                        writer.write_all(line.as_bytes())?;
                    }
                    writer.write_all(b"\n")?;
                }
                RecordKind::CompactionMarker | RecordKind::Other => {
                    writer.write_all(line.as_bytes())?;
                    writer.write_all(b"\n")?;
                }
            }
        }

        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let _ = file.sync_all();
    }

    fsutil::publish(&temp, destination)?;
    guard.disarm();

    metrics.trimmed_bytes = std::fs::metadata(destination)?.len();

    tracing::debug!(
        source = %source.display(),
        original_bytes = metrics.original_bytes,
        trimmed_bytes = metrics.trimmed_bytes,
        tool_results_stubbed = metrics.tool_results_stubbed,
        signatures_stripped = metrics.signatures_stripped,
        "Trim complete"
    );

    Ok(metrics)
}

/// Pass 1: find the last compaction marker and the tool_use ids that will
/// be dropped with the lines before it.
fn scan_pass(source: &Path) -> Result<ScanResult> {
    let reader = BufReader::new(File::open(source)?);

    let mut last_compaction_line = None;
    // (line index, ids) for every tool_use seen; filtered once the last
    // marker position is known.
    let mut tool_use_lines: Vec<(usize, Vec<String>)> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        match classify_record(&value) {
            RecordKind::CompactionMarker => last_compaction_line = Some(index),
            RecordKind::User | RecordKind::Assistant => {
                let ids = tool_use_ids(&value);
                if !ids.is_empty() {
                    tool_use_lines.push((index, ids));
                }
            }
            _ => {}
        }
    }

    let skipped_tool_use_ids = match last_compaction_line {
        Some(last) => tool_use_lines
            .into_iter()
            .filter(|(index, _)| *index < last)
            .flat_map(|(_, ids)| ids)
            .collect(),
        None => HashSet::new(),
    };

    Ok(ScanResult {
        last_compaction_line,
        skipped_tool_use_ids,
    })
}

fn tool_use_ids(record: &Value) -> Vec<String> {
    let Some(content) = crate::transcript::record::content_value(record) else {
        return vec![];
    };
    let Value::Array(blocks) = content else {
        return vec![];
    };
    blocks
        .iter()
        .filter(|b| classify_block(b) == BlockKind::ToolUse)
        .filter_map(|b| b.get("id").and_then(|id| id.as_str()))
        .map(|id| id.to_string())
        .collect()
}

/// Apply the removal taxonomy to one message record. Returns whether the
/// record was modified (untouched lines are written back verbatim).
fn rewrite_message(
    record: &mut Value,
    threshold: usize,
    skipped_ids: &HashSet<String>,
    metrics: &mut TrimMetrics,
) -> bool {
    let mut changed = false;

    if let Some(blocks) = content_blocks_mut(record) {
        let original = std::mem::take(blocks);
        for mut block in original {
            match classify_block(&block) {
                BlockKind::Thinking => {
                    // The upstream signature is only valid over the intact
                    // block, so a partial keep is unsound; drop it whole.
                    metrics.signatures_stripped += 1;
                    changed = true;
                }
                BlockKind::ToolResult => {
                    let orphaned = block
                        .get("tool_use_id")
                        .and_then(|id| id.as_str())
                        .map(|id| skipped_ids.contains(id))
                        .unwrap_or(false);
                    if orphaned {
                        changed = true;
                        continue;
                    }
                    changed |= rewrite_tool_result(&mut block, threshold, metrics);
                    blocks.push(block);
                }
                BlockKind::ToolUse => {
                    metrics.tool_use_requests += 1;
                    if rewrite_tool_use_input(&mut block, threshold) {
                        metrics.tool_use_inputs_stubbed += 1;
                        changed = true;
                    }
                    blocks.push(block);
                }
                _ => blocks.push(block),
            }
        }
    }

    if strip_usage(record) {
        changed = true;
    }

    changed
}

/// Strip image sub-blocks and stub oversized content. The stripped images'
/// serialized size still counts toward the threshold decision: a result
/// that was huge because of a screenshot is stubbed, not quietly shrunk.
fn rewrite_tool_result(block: &mut Value, threshold: usize, metrics: &mut TrimMetrics) -> bool {
    let Some(content) = block.get_mut("content") else {
        return false;
    };

    let mut changed = false;
    let total_len = match content {
        Value::String(s) => s.len(),
        Value::Array(items) => {
            let mut total = 0usize;
            let original = std::mem::take(items);
            for item in original {
                if classify_block(&item) == BlockKind::Image {
                    total += serialized_len(&item);
                    metrics.images_stripped += 1;
                    changed = true;
                    continue;
                }
                total += match item.get("text").and_then(|t| t.as_str()) {
                    Some(text) => text.len(),
                    None => serialized_len(&item),
                };
                items.push(item);
            }
            total
        }
        ref other => serialized_len(other),
    };

    if total_len > threshold {
        *content = json!([{
            "type": "text",
            "text": format!("[Trimmed tool result: ~{} chars]", total_len),
        }]);
        metrics.tool_results_stubbed += 1;
        changed = true;
    }

    changed
}

/// Stub oversized tool inputs. Write tools get their payload fields stubbed
/// individually; other tools fall back to the generic per-key rule once the
/// serialized input exceeds the threshold.
fn rewrite_tool_use_input(block: &mut Value, threshold: usize) -> bool {
    let name = block
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    let Some(input) = block.get_mut("input") else {
        return false;
    };

    if WRITE_TOOLS.contains(&name.as_str()) {
        let Value::Object(map) = input else {
            return false;
        };
        let mut any = false;
        for field in WRITE_TOOL_PAYLOAD_FIELDS {
            if let Some(Value::String(s)) = map.get_mut(field) {
                if s.len() > threshold {
                    *s = stub_input(s.len());
                    any = true;
                }
            }
        }
        return any;
    }

    if serialized_len(input) <= threshold {
        return false;
    }
    let Value::Object(map) = input else {
        return false;
    };
    let mut any = false;
    for (key, value) in map.iter_mut() {
        if PRESERVED_INPUT_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if let Value::String(s) = value {
            if s.len() > threshold {
                *s = stub_input(s.len());
                any = true;
            }
        }
    }
    any
}

fn stub_input(len: usize) -> String {
    format!("[Trimmed input: ~{} chars]", len)
}
