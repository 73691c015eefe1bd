//! Atomic file publication helpers
//!
//! Every artifact another process may read (master index, trimmed transcript,
//! host per-project index) is published as: write to a sibling temp path,
//! sync, rename over the target. On platforms where rename-over fails, fall
//! back to delete-then-rename.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling temp path for `target`, unique per process.
pub fn sibling_temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    target.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

/// Rename `temp` over `target`, handling platforms where rename-over fails.
pub fn publish(temp: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(temp, target) {
        Ok(()) => Ok(()),
        Err(_) if target.exists() => {
            fs::remove_file(target)?;
            fs::rename(temp, target)
        }
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `target` atomically.
pub fn atomic_write(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = sibling_temp_path(target);
    let guard = TempPathGuard::new(temp.clone());

    {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        // Best-effort durability; rename is the atomicity boundary.
        let _ = file.sync_all();
    }

    publish(&temp, target)?;
    guard.disarm();
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(target: &Path, value: &T) -> crate::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write(target, &bytes)?;
    Ok(())
}

/// Copy `src` to `target` atomically.
pub fn atomic_copy(src: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = sibling_temp_path(target);
    let guard = TempPathGuard::new(temp.clone());
    fs::copy(src, &temp)?;
    publish(&temp, target)?;
    guard.disarm();
    Ok(())
}

/// Removes a temp file on drop unless disarmed.
///
/// Keeps error and early-return paths from leaking partially-written files.
pub struct TempPathGuard {
    path: PathBuf,
    armed: bool,
}

impl TempPathGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Keep the file; called after a successful publish.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempPathGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
