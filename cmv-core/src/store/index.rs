//! Master snapshot index
//!
//! A single JSON document mapping snapshot name to its record, plus a
//! schema version. The index is the source of truth for lineage and branch
//! ownership; per-snapshot `meta.json` files are redundant portable copies
//! for export. Published only by atomic rename, so concurrent readers see
//! a consistent pre- or post-operation document.

use crate::error::{Error, Result};
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Current index schema version.
pub const INDEX_VERSION: u32 = 1;

/// Maximum snapshot name length.
pub const MAX_NAME_LEN: usize = 100;

/// The master index document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterIndex {
    pub version: u32,
    #[serde(default)]
    pub snapshots: BTreeMap<String, Snapshot>,
}

impl Default for MasterIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            snapshots: BTreeMap::new(),
        }
    }
}

/// A named, immutable capture of one transcript at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Storage id, `snap_` + 8 hex chars.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// The transcript's id in the host layout at capture time.
    pub source_session_id: String,
    pub source_project_path: String,
    /// Subdirectory under `<home>/snapshots`; initially equal to `id`.
    pub snapshot_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Name of the snapshot this one was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
    #[serde(default)]
    pub session_active_at_capture: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Branch>,
}

/// A continuation forked from a snapshot, materialized under the host layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    /// Fresh random 128-bit id, indistinguishable from host-generated ids.
    pub forked_session_id: String,
    pub created_at: DateTime<Utc>,
}

impl MasterIndex {
    /// Load the index, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Publish the index atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::atomic_write_json(path, self)
    }

    pub fn get(&self, name: &str) -> Result<&Snapshot> {
        self.snapshots
            .get(name)
            .ok_or_else(|| Error::SnapshotNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Snapshot> {
        self.snapshots
            .get_mut(name)
            .ok_or_else(|| Error::SnapshotNotFound(name.to_string()))
    }

    /// The snapshot (if any) whose branches created `session_id`.
    pub fn snapshot_owning_session(&self, session_id: &str) -> Option<&Snapshot> {
        self.snapshots
            .values()
            .find(|s| s.branches.iter().any(|b| b.forked_session_id == session_id))
    }
}

/// Validate a snapshot name: `[A-Za-z0-9_-]`, 1..=100 chars.
pub fn validate_snapshot_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("name exceeds {} characters", MAX_NAME_LEN),
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("character '{}' not allowed (use A-Za-z0-9_-)", bad),
        });
    }
    Ok(())
}
