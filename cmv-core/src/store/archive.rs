//! Portable snapshot archives (`.cmv`)
//!
//! A `.cmv` file is a gzipped POSIX ustar stream containing `meta.json` at
//! the archive root and the captured transcript under `session/`. Branches
//! are excluded: they reference session ids that only exist on the machine
//! that created them.

use crate::error::{Error, Result};
use crate::fsutil::{self, TempPathGuard};
use crate::store::{validate_snapshot_name, Snapshot, Store};
use crate::transcript::count_conversation_messages;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Archive format version.
pub const CMV_VERSION: u32 = 1;

/// Portable copy of a snapshot record, stored both in the snapshot
/// directory and at the root of exported archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub cmv_version: u32,
    pub snapshot_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source_session_id: String,
    pub source_project_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_code_version: Option<String>,
    pub session_file_format: String,
}

impl ArchiveMeta {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            cmv_version: CMV_VERSION,
            snapshot_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at,
            source_session_id: snapshot.source_session_id.clone(),
            source_project_path: snapshot.source_project_path.clone(),
            tags: snapshot.tags.iter().cloned().collect(),
            parent_snapshot: snapshot.parent_snapshot.clone(),
            claude_code_version: None,
            session_file_format: "jsonl".to_string(),
        }
    }
}

/// Write a snapshot's `meta.json`.
pub(crate) fn write_meta(path: &Path, snapshot: &Snapshot) -> Result<()> {
    fsutil::atomic_write_json(path, &ArchiveMeta::from_snapshot(snapshot))
}

/// Options for [`Store::import_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import under this name instead of the archived one.
    pub rename: Option<String>,
    /// Replace an existing snapshot of the same name.
    pub force: bool,
}

/// Outcome of an import.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub snapshot: Snapshot,
    pub warnings: Vec<String>,
}

impl Store {
    /// Export a snapshot as a `.cmv` archive. Defaults to `<name>.cmv` in
    /// the current directory.
    pub fn export_snapshot(&self, name: &str, out_path: Option<&Path>) -> Result<PathBuf> {
        let snapshot = self.get_snapshot(name)?;
        let out = out_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}.cmv", name)));

        let temp = fsutil::sibling_temp_path(&out);
        let guard = TempPathGuard::new(temp.clone());

        {
            let encoder = GzEncoder::new(File::create(&temp)?, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let meta_bytes = serde_json::to_vec_pretty(&ArchiveMeta::from_snapshot(&snapshot))?;
            let mut header = tar::Header::new_ustar();
            header.set_size(meta_bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(snapshot.created_at.timestamp().max(0) as u64);
            header.set_cksum();
            builder.append_data(&mut header, "meta.json", meta_bytes.as_slice())?;

            let session_dir = self.snapshot_dir(&snapshot).join("session");
            for entry in std::fs::read_dir(&session_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let mut file = File::open(entry.path())?;
                builder.append_file(
                    Path::new("session").join(Path::new(&name)),
                    &mut file,
                )?;
            }

            builder.into_inner()?.finish()?;
        }

        fsutil::publish(&temp, &out)?;
        guard.disarm();

        tracing::info!(name = %name, path = %out.display(), "Snapshot exported");
        Ok(out)
    }

    /// Import a `.cmv` archive as a new snapshot with a fresh storage id.
    pub fn import_snapshot(&self, path: &Path, opts: &ImportOptions) -> Result<ImportResult> {
        self.init()?;

        // Unpack into scoped staging so every exit path cleans up.
        let staging = tempfile::TempDir::new_in(&self.home)?;
        {
            let decoder = GzDecoder::new(File::open(path)?);
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(staging.path())?;
        }

        let meta_path = staging.path().join("meta.json");
        if !meta_path.exists() {
            return Err(Error::InvalidArchive(format!(
                "{} has no meta.json",
                path.display()
            )));
        }
        let meta: ArchiveMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)?;

        let session_file = staging
            .path()
            .join("session")
            .join(format!("{}.jsonl", meta.source_session_id));
        if !session_file.exists() {
            return Err(Error::InvalidArchive(format!(
                "{} has no session/{}.jsonl",
                path.display(),
                meta.source_session_id
            )));
        }

        let name = opts.rename.clone().unwrap_or_else(|| meta.name.clone());
        validate_snapshot_name(&name)?;

        let mut index = self.load_index()?;
        if index.snapshots.contains_key(&name) && !opts.force {
            return Err(Error::SnapshotExists(name));
        }
        if let Some(existing) = index.snapshots.remove(&name) {
            let dir = self.snapshot_dir(&existing);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }

        let mut warnings = Vec::new();
        let parent_snapshot = match meta.parent_snapshot {
            Some(parent) if index.snapshots.contains_key(&parent) => Some(parent),
            Some(parent) => {
                warnings.push(format!(
                    "parent snapshot '{}' is not present locally; imported without lineage",
                    parent
                ));
                None
            }
            None => None,
        };

        let id = Store::new_snapshot_id();
        let snapshot = Snapshot {
            id: id.clone(),
            name: name.clone(),
            description: meta.description,
            created_at: meta.created_at,
            source_session_id: meta.source_session_id,
            source_project_path: meta.source_project_path,
            snapshot_dir: id,
            message_count: count_conversation_messages(&session_file).ok(),
            tags: meta.tags.into_iter().collect::<BTreeSet<_>>(),
            parent_snapshot,
            session_active_at_capture: false,
            branches: vec![],
        };

        let dest = self.snapshot_session_file(&snapshot);
        fsutil::atomic_copy(&session_file, &dest)?;
        write_meta(&self.snapshot_dir(&snapshot).join("meta.json"), &snapshot)?;

        index.snapshots.insert(name, snapshot.clone());
        self.save_index(&index)?;

        tracing::info!(
            name = %snapshot.name,
            id = %snapshot.id,
            from = %path.display(),
            "Snapshot imported"
        );

        Ok(ImportResult { snapshot, warnings })
    }
}
