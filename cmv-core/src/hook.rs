//! Auto-trim hook protocol
//!
//! The host assistant invokes the hook binary on `PreCompact` (trim before
//! the host compacts) and `PostToolUse` (size-gated). Input is one JSON
//! object on stdin. The hook must never break the host: stdin is read with
//! a bounded timeout, and every failure anywhere on this path exits 0.
//!
//! Before rewriting a transcript in place, a timestamped backup is saved
//! under `<home>/auto-backups/` and rotated; each run appends to a
//! ring-buffer log capped at its 50 most recent entries.

use crate::error::Result;
use crate::fsutil;
use crate::store::Store;
use crate::trim::{trim, TrimMetrics, TrimOptions, MIN_STUB_THRESHOLD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bound on waiting for the host to write the hook payload.
pub const STDIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Ring-buffer cap for `auto-trim-log.json`.
pub const AUTO_TRIM_LOG_CAP: usize = 50;

/// Payload the host writes to the hook's stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct HookInput {
    pub session_id: String,
    pub transcript_path: PathBuf,
    pub trigger: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// One entry in the auto-trim log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTrimLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub trigger: String,
    pub original_bytes: u64,
    pub trimmed_bytes: u64,
    pub reduction_percent: f64,
    pub backup_path: PathBuf,
}

/// What a hook invocation did.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    Trimmed(TrimMetrics),
    /// Nothing to do: missing file, below the size gate, or unknown trigger.
    Skipped(&'static str),
}

/// Full hook entry point: read stdin (bounded), run, swallow everything.
/// Always returns exit code 0.
pub fn run_auto_trim_hook() -> i32 {
    let Some(payload) = read_stdin_with_timeout(STDIN_TIMEOUT) else {
        return 0;
    };
    let Ok(input) = serde_json::from_str::<HookInput>(&payload) else {
        return 0;
    };

    let store = Store::new();
    match run_auto_trim(&store, &input) {
        Ok(HookOutcome::Trimmed(metrics)) => {
            tracing::info!(
                session = %input.session_id,
                trigger = %input.trigger,
                original_bytes = metrics.original_bytes,
                trimmed_bytes = metrics.trimmed_bytes,
                "Auto-trim complete"
            );
        }
        Ok(HookOutcome::Skipped(reason)) => {
            tracing::debug!(session = %input.session_id, reason, "Auto-trim skipped");
        }
        Err(e) => {
            tracing::warn!(session = %input.session_id, error = %e, "Auto-trim failed");
        }
    }
    0
}

/// Hook body. Errors propagate to the caller, which swallows them.
pub fn run_auto_trim(store: &Store, input: &HookInput) -> Result<HookOutcome> {
    if !input.transcript_path.exists() {
        return Ok(HookOutcome::Skipped("transcript missing"));
    }

    let config = store.config()?.auto_trim;

    match input.trigger.as_str() {
        "PreCompact" => {}
        "PostToolUse" => {
            // The cheap path: one stat, no reads.
            let size = std::fs::metadata(&input.transcript_path)?.len();
            if size < config.size_threshold_bytes {
                return Ok(HookOutcome::Skipped("below size threshold"));
            }
        }
        _ => return Ok(HookOutcome::Skipped("unknown trigger")),
    }

    std::fs::create_dir_all(store.backups_dir())?;
    let backup_path = backup_transcript(store, &input.session_id, &input.transcript_path)?;
    rotate_backups(store, &input.session_id, config.max_backups)?;

    let options = TrimOptions {
        stub_threshold: config.threshold.max(MIN_STUB_THRESHOLD),
    };
    // trim() publishes by temp-write-then-rename, so rewriting in place is
    // safe even if the host appends concurrently to the old inode.
    let metrics = trim(&input.transcript_path, &input.transcript_path, &options)?;

    append_log_entry(
        store,
        AutoTrimLogEntry {
            timestamp: Utc::now(),
            session_id: input.session_id.clone(),
            trigger: input.trigger.clone(),
            original_bytes: metrics.original_bytes,
            trimmed_bytes: metrics.trimmed_bytes,
            reduction_percent: metrics.reduction_percent(),
            backup_path,
        },
    )?;

    Ok(HookOutcome::Trimmed(metrics))
}

/// Read all of stdin on a helper thread, giving up after `timeout`.
fn read_stdin_with_timeout(timeout: Duration) -> Option<String> {
    use std::io::Read;
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buffer = String::new();
        let result = std::io::stdin().read_to_string(&mut buffer).map(|_| buffer);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(payload)) => Some(payload),
        _ => None,
    }
}

/// Copy the transcript to a timestamped backup.
fn backup_transcript(store: &Store, session_id: &str, transcript: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let backup = store
        .backups_dir()
        .join(format!("{}-{}.jsonl", session_id, stamp));
    fsutil::atomic_copy(transcript, &backup)?;
    Ok(backup)
}

/// Keep only the newest `max` backups for a session id.
fn rotate_backups(store: &Store, session_id: &str, max: usize) -> Result<()> {
    let prefix = format!("{}-", session_id);
    let mut backups: Vec<PathBuf> = std::fs::read_dir(store.backups_dir())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(".jsonl"))
                .unwrap_or(false)
        })
        .collect();

    if backups.len() <= max {
        return Ok(());
    }

    // Timestamped names sort chronologically.
    backups.sort();
    let excess = backups.len() - max;
    for old in backups.into_iter().take(excess) {
        let _ = std::fs::remove_file(old);
    }
    Ok(())
}

/// Append to the ring-buffer log, keeping the newest entries.
fn append_log_entry(store: &Store, entry: AutoTrimLogEntry) -> Result<()> {
    let path = store.auto_trim_log_path();
    let mut entries: Vec<AutoTrimLogEntry> = if path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&path)?).unwrap_or_default()
    } else {
        Vec::new()
    };

    entries.push(entry);
    if entries.len() > AUTO_TRIM_LOG_CAP {
        let excess = entries.len() - AUTO_TRIM_LOG_CAP;
        entries.drain(..excess);
    }

    fsutil::atomic_write_json(&path, &entries)
}
