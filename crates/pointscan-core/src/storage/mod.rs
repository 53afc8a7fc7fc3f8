//! Device-local persistent storage.
//!
//! Two independent areas live here:
//! - `LocalStore`: small key-value entries (settings, last-sync marker,
//!   device identifier), one JSON file per key
//! - `QueueStore`: the durable queue of pending scans
//!
//! Whole-file writes replace files atomically, so a crash mid-write leaves the
//! previous contents readable. Appends are fsynced before they return.

pub mod kv;
pub mod queue;

pub use kv::LocalStore;
pub use queue::QueueStore;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to a temporary sibling, fsync it, then rename it over
/// `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    // Persist the rename itself
    sync_parent(path);
    Ok(())
}

/// Append `line` to `path` (created if missing) and fsync it. `len` is the
/// file length before the call; a failed append cuts the file back to it.
pub(crate) fn append_durable(path: &Path, line: &[u8], len: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    // Bytes left by an earlier failed append whose cut-back also failed
    if file.metadata()?.len() != len {
        file.set_len(len)?;
    }
    if let Err(e) = file.write_all(line).and_then(|()| file.sync_data()) {
        let _ = file.set_len(len);
        return Err(e);
    }
    if len == 0 {
        sync_parent(path);
    }
    Ok(())
}

/// Empty `path` if it exists.
pub(crate) fn truncate_durable(path: &Path) -> io::Result<()> {
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => {
            file.set_len(0)?;
            file.sync_all()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/data/queue/queue.json")),
            PathBuf::from("/data/queue/queue.json.tmp")
        );
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_atomic_failure_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.json");
        write_atomic(&path, b"original").unwrap();

        // A directory squatting on the temp name makes the write fail
        fs::create_dir(temp_path(&path)).unwrap();
        assert!(write_atomic(&path, b"replacement").is_err());

        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[test]
    fn test_append_durable_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.log");

        append_durable(&path, b"one\n", 0).unwrap();
        append_durable(&path, b"two\n", 4).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_truncate_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.log");
        truncate_durable(&path).unwrap();
        assert!(!path.exists());

        append_durable(&path, b"one\n", 0).unwrap();
        truncate_durable(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");
    }
}
