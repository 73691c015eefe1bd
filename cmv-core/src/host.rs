//! Host assistant storage layout
//!
//! The host keeps one directory per project under `<root>/projects/`, named
//! by an encoded form of the project's filesystem path, with one
//! `<session_id>.jsonl` transcript per session and a `sessions-index.json`
//! the host maintains (and which is often stale).
//!
//! The encoding is lossy (colons and some special characters are dropped),
//! so decoding prefers the `originalPath` recorded in the index when present.
//!
//! CMV reads this layout to discover sessions and writes to it only when
//! materializing a branch: one new transcript file plus one index entry.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Resolver for the host assistant's per-project transcript directories.
#[derive(Debug, Clone)]
pub struct HostLayout {
    root: PathBuf,
}

impl HostLayout {
    /// Create a layout rooted at the default host directory (~/.claude).
    pub fn new() -> Self {
        Self {
            root: dirs::home_dir()
                .map(|h| h.join(".claude"))
                .unwrap_or_else(|| PathBuf::from(".claude")),
        }
    }

    /// Create a layout with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/projects`
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Project directories currently present under the host root.
    pub fn project_dirs(&self) -> Result<Vec<PathBuf>> {
        let projects = self.projects_dir();
        if !projects.exists() {
            return Ok(vec![]);
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&projects)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// The directory a given project path encodes to (whether or not it exists).
    pub fn project_dir_for(&self, project_path: &Path) -> PathBuf {
        self.projects_dir().join(encode_project_path(project_path))
    }

    /// Resolve the project directory for a project path, consulting each
    /// directory's `sessions-index.json` `originalPath` when the encoded
    /// name does not match (the encoding is lossy).
    pub fn resolve_project_dir(&self, project_path: &str) -> Result<PathBuf> {
        let encoded = self.project_dir_for(Path::new(project_path));
        if encoded.is_dir() {
            return Ok(encoded);
        }

        for dir in self.project_dirs()? {
            if let Some(index) = read_sessions_index(&dir)? {
                if index.original_path.as_deref() == Some(project_path) {
                    return Ok(dir);
                }
            }
        }

        Err(Error::ProjectDirNotFound(project_path.to_string()))
    }

    /// True if any lock file under `<root>/ide/` names a live process.
    ///
    /// Lock bodies are either a bare integer PID or JSON with a `pid` field.
    pub fn has_live_lock(&self) -> bool {
        let lock_dir = self.root.join("ide");
        let Ok(entries) = std::fs::read_dir(&lock_dir) else {
            return false;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            if let Some(pid) = read_lock_pid(&path) {
                if pid_alive(pid) {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for HostLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a project path as a host directory name.
///
/// Colons are removed, the leading separator is stripped, and every
/// remaining separator becomes `--`.
pub fn encode_project_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace(':', "");
    let trimmed = raw
        .strip_prefix(MAIN_SEPARATOR)
        .or_else(|| raw.strip_prefix('/'))
        .unwrap_or(&raw);
    let mut encoded = trimmed.replace(MAIN_SEPARATOR, "--");
    if MAIN_SEPARATOR != '/' {
        encoded = encoded.replace('/', "--");
    }
    encoded
}

/// Best-effort inverse of [`encode_project_path`].
///
/// Ambiguous names cannot be reconstructed exactly; callers should prefer
/// the index's `originalPath` when available.
pub fn decode_project_dir(name: &str) -> PathBuf {
    PathBuf::from(format!("/{}", name.replace("--", "/")))
}

fn read_lock_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if let Ok(pid) = trimmed.parse::<u32>() {
        return Some(pid);
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    value.get("pid").and_then(|p| p.as_u64()).map(|p| p as u32)
}

/// Check whether a PID names a live process.
#[cfg(target_os = "linux")]
pub fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only probes for existence.
    unsafe { kill(pid as i32, 0) == 0 }
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe extern "C" {
    fn kill(pid: i32, sig: i32) -> i32;
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

// ============================================
// sessions-index.json (host-owned, read + append contract)
// ============================================

/// Per-project session index maintained by the host assistant.
///
/// Unknown fields are preserved through `extra` so a read-modify-write
/// round-trip never drops host data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsIndex {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    #[serde(default)]
    pub entries: Vec<SessionIndexEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One session entry in `sessions-index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionIndexEntry {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sidechain: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Read a project directory's `sessions-index.json`, if present.
///
/// A malformed index is treated as absent rather than fatal; the host
/// rewrites it periodically and transcripts remain discoverable by scan.
pub fn read_sessions_index(project_dir: &Path) -> Result<Option<SessionsIndex>> {
    let path = project_dir.join("sessions-index.json");
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    match serde_json::from_str(&content) {
        Ok(index) => Ok(Some(index)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Malformed sessions index");
            Ok(None)
        }
    }
}

/// Atomically publish a project directory's `sessions-index.json`.
pub fn write_sessions_index(project_dir: &Path, index: &SessionsIndex) -> Result<()> {
    crate::fsutil::atomic_write_json(&project_dir.join("sessions-index.json"), index)
}

/// Append an entry to the index, creating the index file if missing.
pub fn append_index_entry(project_dir: &Path, entry: SessionIndexEntry) -> Result<()> {
    let mut index = read_sessions_index(project_dir)?.unwrap_or_else(|| SessionsIndex {
        version: 1,
        original_path: entry.project_path.clone(),
        ..Default::default()
    });
    index.entries.push(entry);
    write_sessions_index(project_dir, &index)
}

/// Remove an entry by session id; returns whether anything was removed.
pub fn remove_index_entry(project_dir: &Path, session_id: &str) -> Result<bool> {
    let Some(mut index) = read_sessions_index(project_dir)? else {
        return Ok(false);
    };
    let before = index.entries.len();
    index.entries.retain(|e| e.session_id != session_id);
    if index.entries.len() == before {
        return Ok(false);
    }
    write_sessions_index(project_dir, &index)?;
    Ok(true)
}

/// Resolve the host assistant binary: config override first, then PATH.
pub fn resolve_host_cli(config: &crate::Config) -> Result<PathBuf> {
    if let Some(ref path) = config.claude_cli_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(Error::HostCliNotFound(format!(
            "configured claude_cli_path does not exist: {}",
            path.display()
        )));
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join("claude");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(Error::HostCliNotFound(
        "no 'claude' binary on PATH and no claude_cli_path configured".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_project_path() {
        assert_eq!(
            encode_project_path(Path::new("/home/user/dev/myproject")),
            "home--user--dev--myproject"
        );
        assert_eq!(encode_project_path(Path::new("/a:b/c")), "ab--c");
    }

    #[test]
    fn test_decode_project_dir() {
        assert_eq!(
            decode_project_dir("home--user--dev--myproject"),
            PathBuf::from("/home/user/dev/myproject")
        );
    }

    #[test]
    fn test_index_round_trip_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let raw = r#"{
  "version": 2,
  "originalPath": "/home/user/proj",
  "hostSpecific": true,
  "entries": [
    { "sessionId": "abc", "customField": 7 }
  ]
}"#;
        std::fs::write(dir.path().join("sessions-index.json"), raw).unwrap();

        let index = read_sessions_index(dir.path()).unwrap().unwrap();
        assert_eq!(index.version, 2);
        assert!(index.extra.contains_key("hostSpecific"));
        assert!(index.entries[0].extra.contains_key("customField"));

        write_sessions_index(dir.path(), &index).unwrap();
        let again = read_sessions_index(dir.path()).unwrap().unwrap();
        assert!(again.extra.contains_key("hostSpecific"));
        assert!(again.entries[0].extra.contains_key("customField"));
    }

    #[test]
    fn test_append_and_remove_entry() {
        let dir = TempDir::new().unwrap();
        let entry = SessionIndexEntry {
            session_id: "11111111-2222-3333-4444-555555555555".to_string(),
            project_path: Some("/home/user/proj".to_string()),
            ..Default::default()
        };
        append_index_entry(dir.path(), entry).unwrap();

        let index = read_sessions_index(dir.path()).unwrap().unwrap();
        assert_eq!(index.version, 1);
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.original_path.as_deref(), Some("/home/user/proj"));

        assert!(remove_index_entry(dir.path(), "11111111-2222-3333-4444-555555555555").unwrap());
        assert!(!remove_index_entry(dir.path(), "missing").unwrap());
    }

    #[test]
    fn test_resolve_project_dir_via_original_path() {
        let dir = TempDir::new().unwrap();
        let layout = HostLayout::with_root(dir.path().to_path_buf());

        // Encoded name differs from the lossy round-trip, so only the
        // index's originalPath can resolve it.
        let project_dir = layout.projects_dir().join("weird--encoding");
        std::fs::create_dir_all(&project_dir).unwrap();
        let index = SessionsIndex {
            version: 1,
            original_path: Some("/home/user/weird & encoding".to_string()),
            ..Default::default()
        };
        write_sessions_index(&project_dir, &index).unwrap();

        let resolved = layout
            .resolve_project_dir("/home/user/weird & encoding")
            .unwrap();
        assert_eq!(resolved, project_dir);

        assert!(matches!(
            layout.resolve_project_dir("/nowhere"),
            Err(Error::ProjectDirNotFound(_))
        ));
    }
}
