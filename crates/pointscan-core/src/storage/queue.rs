//! Durable queue of pending scans.
//!
//! Two files live in the queue directory:
//! - `queue.json`: a snapshot holding records in insertion order plus the
//!   next key to hand out, replaced atomically
//! - `queue.log`: one JSON record per line, appended and fsynced by `append`
//!
//! An append costs one line write no matter how long the queue is. `clear`
//! and `remove_through` fold the log into a new snapshot, then empty the log.
//! Log lines with a key below the snapshot's next key were already folded in
//! and are skipped on load, so a crash between the two steps loses nothing
//! and duplicates nothing. A torn last line is an append that never returned
//! and is dropped.
//!
//! The state is loaded once at open and kept in memory behind the lock.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{NewRecord, QueueRecord};

use super::{append_durable, truncate_durable, write_atomic};

/// Snapshot file name inside the queue directory
const QUEUE_FILE: &str = "queue.json";

/// Append log file name inside the queue directory
const LOG_FILE: &str = "queue.log";

/// Keys start here on a fresh device
const FIRST_KEY: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct QueueDocument {
    next_key: u64,
    records: Vec<QueueRecord>,
}

impl Default for QueueDocument {
    fn default() -> Self {
        Self {
            next_key: FIRST_KEY,
            records: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct QueueState {
    doc: QueueDocument,
    /// Bytes of `queue.log` holding committed lines
    log_len: u64,
}

/// Handle to the durable queue. Clones share the same files and state.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
    log_path: PathBuf,
    state: Arc<Mutex<QueueState>>,
}

impl QueueStore {
    /// Open (creating if needed) the queue stored in `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::storage(format!("failed to create queue directory {}: {e}", dir.display()))
        })?;

        let path = dir.join(QUEUE_FILE);
        let log_path = dir.join(LOG_FILE);

        let mut doc = match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage(format!("queue document is corrupt: {e}")))?,
            None => QueueDocument::default(),
        };
        let log = read_optional(&log_path).await?.unwrap_or_default();
        let log_len = replay(&mut doc, &log)?;

        if log_len < log.len() as u64 {
            warn!(
                discarded = log.len() as u64 - log_len,
                "Dropping incomplete queue log entry"
            );
            cut_log(&log_path, log_len).await?;
        }

        debug!(path = %path.display(), pending = doc.records.len(), "Queue opened");

        Ok(Self {
            path,
            log_path,
            state: Arc::new(Mutex::new(QueueState { doc, log_len })),
        })
    }

    /// Path of the snapshot document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assign the next key to `record` and persist it. Returns only after the
    /// write is on disk.
    pub async fn append(&self, record: NewRecord) -> Result<QueueRecord> {
        let mut state = self.state.lock().await;

        let stored = QueueRecord::from_new(state.doc.next_key, record);
        let mut line = serde_json::to_vec(&stored)
            .map_err(|e| Error::storage(format!("failed to serialize scan: {e}")))?;
        line.push(b'\n');
        let added = line.len() as u64;

        let log_path = self.log_path.clone();
        let len = state.log_len;
        run_blocking("append to queue", move || append_durable(&log_path, &line, len)).await?;

        state.log_len += added;
        state.doc.next_key += 1;
        state.doc.records.push(stored.clone());
        debug!(id = stored.id, pending = state.doc.records.len(), "Scan queued");
        Ok(stored)
    }

    /// Every queued record, in insertion order.
    pub async fn list_all(&self) -> Result<Vec<QueueRecord>> {
        Ok(self.state.lock().await.doc.records.clone())
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.state.lock().await.doc.records.len())
    }

    /// Remove every queued record. Keys keep increasing afterwards.
    /// Returns how many records were removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let doc = QueueDocument {
            next_key: state.doc.next_key,
            records: Vec::new(),
        };
        let removed = state.doc.records.len();

        self.compact(&mut state, doc).await?;
        info!(removed, "Queue cleared");
        Ok(removed)
    }

    /// Remove every record with a key up to and including `last_id`, i.e.
    /// the snapshot a sync submitted. Later records stay queued.
    pub async fn remove_through(&self, last_id: u64) -> Result<usize> {
        let mut state = self.state.lock().await;

        let mut doc = state.doc.clone();
        doc.records.retain(|r| r.id > last_id);
        let removed = state.doc.records.len() - doc.records.len();
        let remaining = doc.records.len();

        self.compact(&mut state, doc).await?;
        info!(removed, remaining, "Synced records removed from queue");
        Ok(removed)
    }

    /// Commit `doc` as the new snapshot and empty the log. `state` changes
    /// only once the snapshot is on disk.
    async fn compact(&self, state: &mut QueueState, doc: QueueDocument) -> Result<()> {
        let contents = serde_json::to_vec(&doc)
            .map_err(|e| Error::storage(format!("failed to serialize queue: {e}")))?;
        let path = self.path.clone();
        run_blocking("write queue", move || write_atomic(&path, &contents)).await?;
        state.doc = doc;

        let log_path = self.log_path.clone();
        match run_blocking("truncate queue log", move || truncate_durable(&log_path)).await {
            Ok(()) => state.log_len = 0,
            // Folded lines are skipped on load, so the snapshot stands
            Err(e) => warn!(error = %e, "Queue log not truncated after compaction"),
        }
        Ok(())
    }
}

/// Apply log lines to `doc`. Returns the length of the prefix made of
/// complete lines.
fn replay(doc: &mut QueueDocument, log: &[u8]) -> Result<u64> {
    let mut complete = 0u64;
    for line in log.split_inclusive(|b| *b == b'\n') {
        if line.last() != Some(&b'\n') {
            break;
        }
        complete += line.len() as u64;

        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }
        let record: QueueRecord = serde_json::from_slice(line)
            .map_err(|e| Error::storage(format!("queue log is corrupt: {e}")))?;
        if record.id < doc.next_key {
            continue;
        }
        doc.next_key = record.id + 1;
        doc.records.push(record);
    }
    Ok(complete)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

async fn cut_log(path: &Path, len: u64) -> Result<()> {
    let cut = async {
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(len).await?;
        file.sync_all().await
    };
    cut.await
        .map_err(|e| Error::storage(format!("failed to repair queue log: {e}")))
}

async fn run_blocking<F>(what: &'static str, f: F) -> Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::storage(format!("{what} task failed: {e}")))?
        .map_err(|e| Error::storage(format!("failed to {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberId;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn scan(member: &str) -> NewRecord {
        NewRecord::new(
            MemberId::parse(member).unwrap(),
            Utc::now(),
            "device-1".to_string(),
        )
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        assert!(queue.list_all().await.unwrap().is_empty());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_keys_in_order() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();

        let a = queue.append(scan("11111111111111")).await.unwrap();
        let b = queue.append(scan("22222222222222")).await.unwrap();
        let c = queue.append(scan("33333333333333")).await.unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));

        let all = queue.list_all().await.unwrap();
        let members: Vec<&str> = all.iter().map(|r| r.member_id.as_str()).collect();
        assert_eq!(members, ["11111111111111", "22222222222222", "33333333333333"]);
        assert_eq!(all, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_append_only_writes_log_line() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        for i in 0..3 {
            queue.append(scan(&format!("{:014}", i))).await.unwrap();
        }

        assert!(!dir.path().join(QUEUE_FILE).exists());
        let log = fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(log.lines().count(), 3);

        queue.clear().await.unwrap();
        assert!(dir.path().join(QUEUE_FILE).exists());
        assert_eq!(fs::read(dir.path().join(LOG_FILE)).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let queue = QueueStore::open(dir.path()).await.unwrap();
            queue.append(scan("11111111111111")).await.unwrap();
            queue.append(scan("22222222222222")).await.unwrap();
        }

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        let next = reopened.append(scan("33333333333333")).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_clear_keeps_keys_increasing() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        queue.append(scan("11111111111111")).await.unwrap();
        queue.append(scan("22222222222222")).await.unwrap();

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(queue.count().await.unwrap(), 0);

        let after = queue.append(scan("33333333333333")).await.unwrap();
        assert_eq!(after.id, 3);

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), vec![after]);
        assert_eq!(reopened.append(scan("44444444444444")).await.unwrap().id, 4);
    }

    #[tokio::test]
    async fn test_remove_through_keeps_later_records() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        queue.append(scan("11111111111111")).await.unwrap();
        let second = queue.append(scan("22222222222222")).await.unwrap();
        let third = queue.append(scan("33333333333333")).await.unwrap();

        assert_eq!(queue.remove_through(second.id).await.unwrap(), 2);
        assert_eq!(queue.list_all().await.unwrap(), vec![third.clone()]);

        let next = queue.append(scan("44444444444444")).await.unwrap();
        assert_eq!(next.id, 4);

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), vec![third, next]);
    }

    #[tokio::test]
    async fn test_folded_log_lines_are_not_replayed() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        let first = queue.append(scan("11111111111111")).await.unwrap();
        let second = queue.append(scan("22222222222222")).await.unwrap();
        let log = fs::read(dir.path().join(LOG_FILE)).unwrap();

        queue.remove_through(first.id).await.unwrap();
        // Crash after the snapshot was written but before the log was emptied
        fs::write(dir.path().join(LOG_FILE), &log).unwrap();

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), vec![second]);
        assert_eq!(reopened.append(scan("33333333333333")).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_torn_log_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let queue = QueueStore::open(dir.path()).await.unwrap();
            queue.append(scan("11111111111111")).await.unwrap();
            queue.append(scan("22222222222222")).await.unwrap();
        }
        let mut log = fs::read(dir.path().join(LOG_FILE)).unwrap();
        log.extend_from_slice(br#"{"id":3,"memberId":"3333"#);
        fs::write(dir.path().join(LOG_FILE), &log).unwrap();

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        let next = reopened.append(scan("44444444444444")).await.unwrap();
        assert_eq!(next.id, 3);

        let again = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(again.list_all().await.unwrap().last(), Some(&next));
    }

    #[tokio::test]
    async fn test_failed_clear_leaves_queue_unchanged() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();
        queue.append(scan("11111111111111")).await.unwrap();
        let before = queue.list_all().await.unwrap();

        fs::create_dir(dir.path().join("queue.json.tmp")).unwrap();
        assert!(matches!(queue.clear().await, Err(Error::Storage(_))));

        assert_eq!(queue.list_all().await.unwrap(), before);
        fs::remove_dir(dir.path().join("queue.json.tmp")).unwrap();
        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_append_is_storage_fault() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();

        fs::create_dir(dir.path().join(LOG_FILE)).unwrap();
        assert!(matches!(
            queue.append(scan("11111111111111")).await,
            Err(Error::Storage(_))
        ));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_storage_fault() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(QUEUE_FILE), "[[[").unwrap();
        assert!(matches!(
            QueueStore::open(dir.path()).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_log_line_is_storage_fault() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOG_FILE), "not a record\n").unwrap();
        assert!(matches!(
            QueueStore::open(dir.path()).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let queue = QueueStore::open(dir.path()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue.append(scan(&format!("{:014}", i))).await.unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let all = queue.list_all().await.unwrap();
        assert_eq!(all.len(), 8);
        let ids: Vec<u64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());

        let reopened = QueueStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), all);
    }
}
