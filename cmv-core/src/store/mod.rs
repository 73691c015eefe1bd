//! Content-addressed snapshot store
//!
//! Storage root (`$CMV_HOME`, default `~/.cmv`):
//!
//! ```text
//! <home>/
//!   index.json              master index
//!   config.json             engine config
//!   auto-trim-log.json      ring-buffer log of automated trims
//!   auto-backups/           rotating pre-trim backups
//!   snapshots/
//!     <snapshot_id>/
//!       meta.json           portable copy of the Snapshot record
//!       session/
//!         <source_session_id>.jsonl
//! ```
//!
//! The store never modifies transcripts the host created; it copies them in
//! on capture and adds new ones on branch. The master index is always
//! written after on-disk artifacts are in place.

mod archive;
mod branch;
mod index;

pub use archive::{ArchiveMeta, ImportOptions, ImportResult};
pub use branch::{BranchOptions, BranchResult};
pub use index::{validate_snapshot_name, Branch, MasterIndex, Snapshot, INDEX_VERSION};

use crate::config::{cmv_home, Config};
use crate::error::{Error, Result};
use crate::host::HostLayout;
use crate::transcript::{count_conversation_messages, SessionEntry, TranscriptReader};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Parameters for [`Store::create_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotParams {
    pub name: String,
    /// Session id or prefix; None captures the most recently modified
    /// transcript across all projects.
    pub session: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// A snapshot with its resolved children, computed on demand from the index.
#[derive(Debug, Clone)]
pub struct SnapshotNode {
    pub snapshot: Snapshot,
    pub children: Vec<SnapshotNode>,
}

/// The snapshot/branch store.
#[derive(Debug, Clone)]
pub struct Store {
    home: PathBuf,
    layout: HostLayout,
}

impl Store {
    /// Store at the default home (`$CMV_HOME` or `~/.cmv`) over the default
    /// host layout.
    pub fn new() -> Self {
        Self {
            home: cmv_home(),
            layout: HostLayout::new(),
        }
    }

    /// Store at a custom home (for testing).
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            layout: HostLayout::new(),
        }
    }

    /// Store at a custom home over a custom host layout (for testing).
    pub fn with_home_and_layout(home: PathBuf, layout: HostLayout) -> Self {
        Self { home, layout }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    pub fn reader(&self) -> TranscriptReader {
        TranscriptReader::with_layout(self.layout.clone())
    }

    pub fn config(&self) -> Result<Config> {
        Config::load_from_home(&self.home)
    }

    pub fn index_path(&self) -> PathBuf {
        self.home.join("index.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.home.join("snapshots")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("auto-backups")
    }

    pub fn auto_trim_log_path(&self) -> PathBuf {
        self.home.join("auto-trim-log.json")
    }

    /// Directory of a snapshot.
    pub fn snapshot_dir(&self, snapshot: &Snapshot) -> PathBuf {
        self.snapshots_dir().join(&snapshot.snapshot_dir)
    }

    /// Path of a snapshot's captured transcript.
    pub fn snapshot_session_file(&self, snapshot: &Snapshot) -> PathBuf {
        self.snapshot_dir(snapshot)
            .join("session")
            .join(format!("{}.jsonl", snapshot.source_session_id))
    }

    /// Create the store directories and an empty index if none exists.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(self.snapshots_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        if !self.index_path().exists() {
            MasterIndex::default().save(&self.index_path())?;
        }
        Ok(())
    }

    pub fn load_index(&self) -> Result<MasterIndex> {
        MasterIndex::load(&self.index_path())
    }

    pub(crate) fn save_index(&self, index: &MasterIndex) -> Result<()> {
        index.save(&self.index_path())
    }

    /// Fresh snapshot storage id: `snap_` + 8 hex chars.
    pub fn new_snapshot_id() -> String {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("snap_{}", &uuid[..8])
    }

    /// Capture a transcript into a new snapshot. Returns the snapshot and
    /// any non-fatal warnings (live source, empty source).
    pub fn create_snapshot(
        &self,
        params: &CreateSnapshotParams,
    ) -> Result<(Snapshot, Vec<String>)> {
        self.init()?;
        validate_snapshot_name(&params.name)?;

        let mut index = self.load_index()?;
        if index.snapshots.contains_key(&params.name) {
            return Err(Error::SnapshotExists(params.name.clone()));
        }

        let reader = self.reader();
        let source: SessionEntry = match params.session.as_deref() {
            Some(id) => reader.find(id)?,
            None => reader.latest()?,
        };

        let mut warnings = Vec::new();
        if source.is_active {
            warnings.push(format!(
                "session {} looks live (modified {}s ago); the capture may miss in-flight messages",
                source.session_id,
                Utc::now()
                    .signed_duration_since(source.modified_at)
                    .num_seconds()
            ));
        }

        let message_count = source.message_count.or_else(|| {
            count_conversation_messages(&source.path).ok()
        });
        if message_count == Some(0) {
            warnings.push(format!(
                "session {} has no conversation messages; it cannot be branched until it does",
                source.session_id
            ));
        }

        let id = Self::new_snapshot_id();
        let snapshot = Snapshot {
            id: id.clone(),
            name: params.name.clone(),
            description: params.description.clone(),
            created_at: Utc::now(),
            source_session_id: source.session_id.clone(),
            source_project_path: source.project_path.to_string_lossy().into_owned(),
            snapshot_dir: id,
            message_count,
            tags: params.tags.iter().cloned().collect::<BTreeSet<_>>(),
            // Capturing a branched session links the new snapshot into the
            // lineage of the snapshot that created it.
            parent_snapshot: index
                .snapshot_owning_session(&source.session_id)
                .map(|s| s.name.clone()),
            session_active_at_capture: source.is_active,
            branches: vec![],
        };

        let session_file = self.snapshot_session_file(&snapshot);
        crate::fsutil::atomic_copy(&source.path, &session_file)?;

        archive::write_meta(&self.snapshot_dir(&snapshot).join("meta.json"), &snapshot)?;

        index
            .snapshots
            .insert(snapshot.name.clone(), snapshot.clone());
        self.save_index(&index)?;

        tracing::info!(
            name = %snapshot.name,
            id = %snapshot.id,
            source = %snapshot.source_session_id,
            "Snapshot created"
        );

        Ok((snapshot, warnings))
    }

    /// Delete a snapshot and its directory. Branches are user-owned session
    /// files under the host layout and are not cascade-deleted.
    pub fn delete_snapshot(&self, name: &str) -> Result<()> {
        let mut index = self.load_index()?;
        let snapshot = index.get(name)?.clone();

        let dir = self.snapshot_dir(&snapshot);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }

        index.snapshots.remove(name);
        self.save_index(&index)?;

        tracing::info!(name = %name, "Snapshot deleted");
        Ok(())
    }

    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let index = self.load_index()?;
        Ok(index.snapshots.into_values().collect())
    }

    pub fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        Ok(self.load_index()?.get(name)?.clone())
    }

    /// Snapshot lineage as a forest, roots first. A snapshot whose parent
    /// is missing (pruned by import) is treated as a root.
    pub fn build_tree(&self) -> Result<Vec<SnapshotNode>> {
        let index = self.load_index()?;

        fn children_of(index: &MasterIndex, parent: &str) -> Vec<SnapshotNode> {
            index
                .snapshots
                .values()
                .filter(|s| s.parent_snapshot.as_deref() == Some(parent))
                .map(|s| SnapshotNode {
                    snapshot: s.clone(),
                    children: children_of(index, &s.name),
                })
                .collect()
        }

        Ok(index
            .snapshots
            .values()
            .filter(|s| {
                s.parent_snapshot.is_none()
                    || !index
                        .snapshots
                        .contains_key(s.parent_snapshot.as_deref().unwrap_or_default())
            })
            .map(|s| SnapshotNode {
                snapshot: s.clone(),
                children: children_of(&index, &s.name),
            })
            .collect())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
