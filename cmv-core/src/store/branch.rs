//! Branch materialization
//!
//! A branch turns a snapshot back into a live session: the captured JSONL
//! is copied (or trimmed) to a fresh session id under the host's project
//! directory, registered in the host's per-project index, and recorded on
//! the snapshot in the master index, in that order, so the index never
//! references a file that is not in place.

use crate::error::{Error, Result};
use crate::fsutil::{self, TempPathGuard};
use crate::host;
use crate::store::{Branch, Store};
use crate::transcript::count_conversation_messages;
use crate::trim::{self, TrimMetrics, TrimOptions};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

/// Options for [`Store::create_branch`].
#[derive(Debug, Clone, Default)]
pub struct BranchOptions {
    /// Branch name; defaults to `branch-<first 8 hex of the new id>`.
    pub branch_name: Option<String>,
    /// Trim while materializing instead of copying verbatim.
    pub trim: bool,
    /// Stub threshold for the trim; default 500.
    pub trim_threshold: Option<usize>,
    /// User message appended to the end of the new transcript.
    pub orientation_message: Option<String>,
    /// Validate and report without writing anything.
    pub dry_run: bool,
    /// Caller will not launch the host CLI; carried for the CLI layer.
    pub skip_launch: bool,
}

/// Outcome of a branch operation.
#[derive(Debug, Clone)]
pub struct BranchResult {
    pub snapshot: String,
    pub branch: Branch,
    /// The materialized transcript under the host layout.
    pub session_path: PathBuf,
    pub project_dir: PathBuf,
    /// Present when the branch was trimmed.
    pub trim_metrics: Option<TrimMetrics>,
    pub dry_run: bool,
}

impl Store {
    /// Fork a new session from a snapshot.
    pub fn create_branch(&self, snapshot_name: &str, opts: &BranchOptions) -> Result<BranchResult> {
        let mut index = self.load_index()?;
        let snapshot = index.get(snapshot_name)?.clone();

        let source = self.snapshot_session_file(&snapshot);
        if count_conversation_messages(&source).unwrap_or(0) == 0 {
            return Err(Error::NoConversationContent(snapshot_name.to_string()));
        }

        let project_dir = self
            .layout()
            .resolve_project_dir(&snapshot.source_project_path)?;

        let forked_session_id = uuid::Uuid::new_v4().to_string();
        let branch_name = opts
            .branch_name
            .clone()
            .unwrap_or_else(|| format!("branch-{}", &forked_session_id.replace('-', "")[..8]));

        if snapshot.branches.iter().any(|b| b.name == branch_name) {
            return Err(Error::BranchExists {
                snapshot: snapshot_name.to_string(),
                branch: branch_name,
            });
        }

        let session_path = project_dir.join(format!("{}.jsonl", forked_session_id));
        let branch = Branch {
            name: branch_name,
            forked_session_id: forked_session_id.clone(),
            created_at: Utc::now(),
        };

        if opts.dry_run {
            return Ok(BranchResult {
                snapshot: snapshot_name.to_string(),
                branch,
                session_path,
                project_dir,
                trim_metrics: None,
                dry_run: true,
            });
        }

        // Materialize to a sibling temp path, append the orientation
        // message if any, and only then publish under the final name.
        let temp = fsutil::sibling_temp_path(&session_path);
        let temp_guard = TempPathGuard::new(temp.clone());

        let trim_metrics = if opts.trim {
            let options = TrimOptions {
                stub_threshold: opts.trim_threshold.unwrap_or(trim::DEFAULT_STUB_THRESHOLD),
            };
            Some(trim::trim(&source, &temp, &options)?)
        } else {
            std::fs::copy(&source, &temp)?;
            None
        };

        if let Some(ref message) = opts.orientation_message {
            append_orientation_message(&temp, &forked_session_id, message)?;
        }

        fsutil::publish(&temp, &session_path)?;
        temp_guard.disarm();

        // From here on a failure must not leave the published file behind.
        let publish_guard = TempPathGuard::new(session_path.clone());

        let now = Utc::now();
        host::append_index_entry(
            &project_dir,
            host::SessionIndexEntry {
                session_id: forked_session_id.clone(),
                full_path: Some(session_path.to_string_lossy().into_owned()),
                file_mtime: Some(now.timestamp_millis()),
                first_prompt: Some(branch.name.clone()),
                message_count: Some(0),
                created: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
                modified: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
                project_path: Some(snapshot.source_project_path.clone()),
                is_sidechain: Some(false),
                ..Default::default()
            },
        )?;

        index
            .get_mut(snapshot_name)?
            .branches
            .push(branch.clone());
        self.save_index(&index)?;
        publish_guard.disarm();

        tracing::info!(
            snapshot = %snapshot_name,
            branch = %branch.name,
            session = %forked_session_id,
            trimmed = opts.trim,
            "Branch created"
        );

        Ok(BranchResult {
            snapshot: snapshot_name.to_string(),
            branch,
            session_path,
            project_dir,
            trim_metrics,
            dry_run: false,
        })
    }

    /// Delete a branch: the materialized file, the host-index entry, and
    /// the branch record. Tolerates a file or index entry already gone.
    pub fn delete_branch(&self, snapshot_name: &str, branch_name: &str) -> Result<()> {
        let mut index = self.load_index()?;
        let snapshot = index.get(snapshot_name)?.clone();

        let Some(branch) = snapshot.branches.iter().find(|b| b.name == branch_name) else {
            return Err(Error::BranchNotFound {
                snapshot: snapshot_name.to_string(),
                branch: branch_name.to_string(),
            });
        };

        if let Ok(project_dir) = self
            .layout()
            .resolve_project_dir(&snapshot.source_project_path)
        {
            let session_path =
                project_dir.join(format!("{}.jsonl", branch.forked_session_id));
            if session_path.exists() {
                std::fs::remove_file(&session_path)?;
            }
            let _ = host::remove_index_entry(&project_dir, &branch.forked_session_id)?;
        }

        index
            .get_mut(snapshot_name)?
            .branches
            .retain(|b| b.name != branch_name);
        self.save_index(&index)?;

        tracing::info!(snapshot = %snapshot_name, branch = %branch_name, "Branch deleted");
        Ok(())
    }
}

/// Append a user-role record carrying the orientation text.
fn append_orientation_message(path: &std::path::Path, session_id: &str, text: &str) -> Result<()> {
    let record = json!({
        "type": "user",
        "sessionId": session_id,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "message": {
            "role": "user",
            "content": [{"type": "text", "text": text}],
        },
    });
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}
