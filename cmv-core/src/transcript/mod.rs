//! Transcript discovery and reading
//!
//! Discovers transcripts across all host projects, merges the host's
//! per-project `sessions-index.json` with what is actually on disk
//! (refreshing stale mtimes), and cheaply counts conversation messages
//! with a substring scan so discovery stays fast even over hundreds of
//! multi-megabyte files. Per-file stat+peek work fans out across a rayon
//! pool; every file is independent.

pub mod record;

use crate::error::{Error, Result};
use crate::host::{self, HostLayout};
use chrono::{DateTime, Utc};
use memchr::memmem;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A source is considered possibly-live when modified this recently.
pub const ACTIVE_WINDOW_SECS: i64 = 120;

/// Minimum prefix length accepted by [`TranscriptReader::find`].
pub const MIN_PREFIX_LEN: usize = 4;

/// One discovered transcript.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub path: PathBuf,
    /// Encoded project directory name under the host layout.
    pub project_dir: String,
    /// Decoded project path; from the index when available, else best-effort.
    pub project_path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub message_count: Option<usize>,
    pub first_prompt: Option<String>,
    /// Modified within the activity window while a host lock names a live PID.
    pub is_active: bool,
}

/// Discovery filter.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions under this project path.
    pub project: Option<PathBuf>,
    /// Only sessions with at least one conversation message.
    pub non_empty: bool,
}

/// Reads and discovers transcripts under a host layout.
#[derive(Debug, Clone)]
pub struct TranscriptReader {
    layout: HostLayout,
}

impl TranscriptReader {
    pub fn new() -> Self {
        Self {
            layout: HostLayout::new(),
        }
    }

    pub fn with_layout(layout: HostLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    /// Discover transcripts across all projects, most recent first.
    pub fn discover(&self, filter: &SessionFilter) -> Result<Vec<SessionEntry>> {
        let host_locked = self.layout.has_live_lock();
        let mut candidates: Vec<(PathBuf, String, Option<host::SessionIndexEntry>)> = Vec::new();

        for project_dir in self.layout.project_dirs()? {
            let dir_name = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let index = host::read_sessions_index(&project_dir)?;
            let original_path = index.as_ref().and_then(|i| i.original_path.clone());

            if let Some(ref wanted) = filter.project {
                let decoded = original_path
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| host::decode_project_dir(&dir_name));
                if decoded != *wanted {
                    continue;
                }
            }

            for entry in std::fs::read_dir(&project_dir)? {
                let entry = entry?;
                let path = entry.path();
                // Per-session sidecar directories are ignored.
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                let index_entry = index.as_ref().and_then(|i| {
                    i.entries
                        .iter()
                        .find(|e| e.session_id == stem)
                        .cloned()
                });
                if index_entry
                    .as_ref()
                    .and_then(|e| e.is_sidechain)
                    .unwrap_or(false)
                {
                    continue;
                }

                candidates.push((path, dir_name.clone(), index_entry));
            }
        }

        // Independent stat+peek per transcript; fan out.
        let mut entries: Vec<SessionEntry> = candidates
            .par_iter()
            .filter_map(|(path, dir_name, index_entry)| {
                self.entry_for(path, dir_name, index_entry.as_ref(), host_locked)
                    .ok()
            })
            .collect();

        if filter.non_empty {
            entries.retain(|e| e.message_count.unwrap_or(0) > 0);
        }

        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

        tracing::debug!(count = entries.len(), "Discovered transcripts");
        Ok(entries)
    }

    fn entry_for(
        &self,
        path: &Path,
        project_dir: &str,
        index_entry: Option<&host::SessionIndexEntry>,
        host_locked: bool,
    ) -> Result<SessionEntry> {
        let metadata = std::fs::metadata(path)?;
        // The host index is often stale; the filesystem mtime wins.
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let project_path = index_entry
            .and_then(|e| e.project_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| host::decode_project_dir(project_dir));

        let age = Utc::now().signed_duration_since(modified_at);
        let is_active = host_locked && age.num_seconds() < ACTIVE_WINDOW_SECS;

        Ok(SessionEntry {
            session_id,
            path: path.to_path_buf(),
            project_dir: project_dir.to_string(),
            project_path,
            size_bytes: metadata.len(),
            modified_at,
            message_count: count_conversation_messages(path).ok(),
            first_prompt: index_entry.and_then(|e| e.first_prompt.clone()),
            is_active,
        })
    }

    /// Resolve a session by exact id or unique prefix (>= 4 chars).
    pub fn find(&self, id_or_prefix: &str) -> Result<SessionEntry> {
        let entries = self.discover(&SessionFilter::default())?;

        if let Some(exact) = entries.iter().find(|e| e.session_id == id_or_prefix) {
            return Ok(exact.clone());
        }

        if id_or_prefix.len() < MIN_PREFIX_LEN {
            return Err(Error::SessionNotFound(id_or_prefix.to_string()));
        }

        let matches: Vec<&SessionEntry> = entries
            .iter()
            .filter(|e| e.session_id.starts_with(id_or_prefix))
            .collect();

        match matches.len() {
            0 => Err(Error::SessionNotFound(id_or_prefix.to_string())),
            1 => Ok(matches[0].clone()),
            _ => Err(Error::AmbiguousSession {
                prefix: id_or_prefix.to_string(),
                matches: matches.iter().map(|e| e.session_id.clone()).collect(),
            }),
        }
    }

    /// The most recently modified transcript across all projects.
    pub fn latest(&self) -> Result<SessionEntry> {
        self.discover(&SessionFilter::default())?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SessionNotFound("no transcripts found".to_string()))
    }
}

impl Default for TranscriptReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap user+assistant message count: a substring scan per line, no JSON
/// parsing. Good enough for discovery listings and the empty-session check.
pub fn count_conversation_messages(path: &Path) -> Result<usize> {
    let user_finder = memmem::Finder::new(b"\"type\":\"user\"");
    let assistant_finder = memmem::Finder::new(b"\"type\":\"assistant\"");
    let user_role_finder = memmem::Finder::new(b"\"role\":\"user\"");

    let reader = BufReader::new(File::open(path)?);
    let mut count = 0usize;
    for line in reader.lines() {
        let line = line?;
        let bytes = line.as_bytes();
        if user_finder.find(bytes).is_some()
            || assistant_finder.find(bytes).is_some()
            || user_role_finder.find(bytes).is_some()
        {
            count += 1;
        }
    }
    Ok(count)
}
