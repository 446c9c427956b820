//! Two-tier history log
//!
//! Reads come from a bounded in-memory cache kept sorted by timestamp. Every
//! logged entry is also written to
//! `<root>/<YYYY-MM>/<YYYY-MM-DD>-<id>.json` by a single background writer
//! fed through a bounded queue, so writes are ordered and `log` never waits on
//! disk I/O. Disk failures are logged and never reach the caller.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{HistoryEntry, HistoryFilter, HistoryStats};
use crate::{Error, Result};

/// Capacity of the disk write queue
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// Calendar months loaded on startup (current one included)
pub const LOADED_MONTHS: u32 = 3;

enum WriteCommand {
    Persist(Box<HistoryEntry>),
    Flush(oneshot::Sender<()>),
    Clear(oneshot::Sender<Result<()>>),
}

/// Bounded in-memory history backed by one JSON file per entry
pub struct HistoryTracker {
    root: PathBuf,
    max_entries: usize,
    // Oldest first
    entries: RwLock<VecDeque<HistoryEntry>>,
    writer: mpsc::Sender<WriteCommand>,
}

impl HistoryTracker {
    /// Open the history under `root`, loading recent partitions.
    ///
    /// Must be called from within a Tokio runtime; the disk writer is spawned here.
    pub async fn open(root: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self::open_at(root, max_entries, Utc::now()).await
    }

    /// Like [`open`](Self::open) with an explicit "now" for choosing partitions
    pub async fn open_at(root: impl Into<PathBuf>, max_entries: usize, now: DateTime<Utc>) -> Self {
        let root = root.into();
        let max_entries = max_entries.max(1);

        let mut loaded = load_recent(&root, now).await;
        loaded.sort_by_key(|e| e.timestamp);
        if loaded.len() > max_entries {
            let excess = loaded.len() - max_entries;
            loaded.drain(..excess);
        }
        info!(root = %root.display(), loaded = loaded.len(), "history opened");

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        tokio::spawn(run_writer(root.clone(), rx));

        Self {
            root,
            max_entries,
            entries: RwLock::new(loaded.into()),
            writer: tx,
        }
    }

    /// Directory holding the month partitions
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record `entry`, assigning id and timestamp when unset. Returns the id.
    ///
    /// The entry is visible to readers before this returns. The disk write
    /// happens later; this only waits when the write queue is full.
    ///
    /// Ids that are not a single plain file name component are replaced
    /// with a fresh one, so every entry file stays under the root.
    pub async fn log(&self, mut entry: HistoryEntry) -> String {
        if !is_plain_id(&entry.id) {
            if !entry.id.is_empty() {
                warn!(id = %entry.id, "history entry id is not a plain file name, replacing it");
            }
            entry.id = Uuid::new_v4().to_string();
        }
        if !entry.has_timestamp() {
            entry.timestamp = Utc::now();
        }
        let id = entry.id.clone();

        {
            let mut entries = self.entries.write();
            let at = entries.partition_point(|e| e.timestamp <= entry.timestamp);
            entries.insert(at, entry.clone());
            while entries.len() > self.max_entries {
                entries.pop_front();
            }
        }

        if self
            .writer
            .send(WriteCommand::Persist(Box::new(entry)))
            .await
            .is_err()
        {
            warn!(id = %id, "history writer stopped, entry kept in memory only");
        }
        id
    }

    /// Every cached entry, newest first
    pub fn get_all(&self) -> Vec<HistoryEntry> {
        self.entries.read().iter().rev().cloned().collect()
    }

    /// Cached entries matching `filter`, newest first
    pub fn get_filtered(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Cached entry by id
    pub fn get_by_id(&self, id: &str) -> Result<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("history entry", id))
    }

    /// Counts over the cached entries
    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats::default();
        for entry in self.entries.read().iter() {
            stats.add(entry);
        }
        stats
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Wait until every write queued so far has been attempted
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriteCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Drop the cache and delete every file under the root. Irreversible.
    ///
    /// Writes queued before this call land first and are deleted with the rest.
    pub async fn clear(&self) -> Result<()> {
        self.entries.write().clear();

        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriteCommand::Clear(tx))
            .await
            .map_err(|_| Error::persistence(&self.root, "history writer stopped"))?;
        rx.await
            .map_err(|_| Error::persistence(&self.root, "history writer stopped"))?
    }
}

/// Letters, digits, `-`, `_` and `.`, but not `.` or `..` alone
fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Path of an entry's file under `root`
pub fn entry_path(root: &Path, entry: &HistoryEntry) -> PathBuf {
    root.join(entry.timestamp.format("%Y-%m").to_string())
        .join(format!("{}-{}.json", entry.timestamp.format("%Y-%m-%d"), entry.id))
}

async fn run_writer(root: PathBuf, mut rx: mpsc::Receiver<WriteCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Persist(entry) => {
                if let Err(e) = write_entry(&root, &entry).await {
                    warn!(id = %entry.id, error = %e, "failed to persist history entry");
                }
            }
            WriteCommand::Flush(done) => {
                let _ = done.send(());
            }
            WriteCommand::Clear(done) => {
                let _ = done.send(remove_all(&root).await);
            }
        }
    }
    debug!("history writer stopped");
}

async fn write_entry(root: &Path, entry: &HistoryEntry) -> Result<()> {
    let path = entry_path(root, entry);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::persistence(dir, e))?;
    }
    let data = serde_json::to_vec_pretty(entry)?;
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| Error::persistence(&path, e))
}

async fn remove_all(root: &Path) -> Result<()> {
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::persistence(root, e)),
    };

    let mut removed = 0usize;
    while let Some(item) = dir.next_entry().await.map_err(|e| Error::persistence(root, e))? {
        let path = item.path();
        let file_type = item
            .file_type()
            .await
            .map_err(|e| Error::persistence(&path, e))?;
        let result = if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| Error::persistence(&path, e))?;
        removed += 1;
    }
    info!(root = %root.display(), removed, "history cleared");
    Ok(())
}

/// `YYYY-MM` labels of the `LOADED_MONTHS` calendar months ending at `now`
fn recent_months(now: DateTime<Utc>) -> Vec<String> {
    let (mut year, mut month) = (now.year(), now.month());
    (0..LOADED_MONTHS)
        .map(|_| {
            let label = format!("{:04}-{:02}", year, month);
            if month == 1 {
                year -= 1;
                month = 12;
            } else {
                month -= 1;
            }
            label
        })
        .collect()
}

async fn load_recent(root: &Path, now: DateTime<Utc>) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    for month in recent_months(now) {
        let dir = root.join(&month);
        let mut files = match tokio::fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(_) => continue,
        };
        while let Ok(Some(file)) = files.next_entry().await {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(data) => serde_json::from_str::<HistoryEntry>(&data).map_err(Error::from),
                Err(e) => Err(Error::persistence(&path, e)),
            };
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping history file"),
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryAction, HistoryStatus};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    fn entry(cluster: &str, status: HistoryStatus, ts: DateTime<Utc>) -> HistoryEntry {
        let mut e = HistoryEntry::new(HistoryAction::ApplyNodepool, cluster, "user1");
        e.status = status;
        e.timestamp = ts;
        e
    }

    #[test]
    fn test_recent_months_cross_year_boundary() {
        assert_eq!(
            recent_months(at(2026, 2, 28, 0)),
            vec!["2026-02", "2026-01", "2025-12"]
        );
        // Month arithmetic must not skip February from a 31st
        assert_eq!(
            recent_months(at(2026, 3, 31, 0)),
            vec!["2026-03", "2026-02", "2026-01"]
        );
    }

    #[tokio::test]
    async fn test_log_assigns_id_and_timestamp_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = HistoryTracker::open(dir.path(), 10).await;

        let id = tracker
            .log(HistoryEntry::new(HistoryAction::SaveSession, "akspriv-a", "sess"))
            .await;
        tracker.flush().await;

        let stored = tracker.get_by_id(&id).unwrap();
        assert!(stored.has_timestamp());
        assert!(!stored.id.is_empty());

        let raw = std::fs::read_to_string(entry_path(dir.path(), &stored)).unwrap();
        assert!(raw.starts_with("{\n  \"id\": "));
        let parsed: HistoryEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, stored);
    }

    #[tokio::test]
    async fn test_keeps_only_the_most_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = HistoryTracker::open(dir.path(), 1000).await;
        let base = at(2026, 3, 1, 0);

        // Interleave old and new so eviction has to go by timestamp
        for i in (0..1200u32).rev().step_by(2).chain((0..1200u32).step_by(2)) {
            let e = entry("c", HistoryStatus::Success, base + chrono::Duration::seconds(i as i64));
            tracker.log(e).await;
        }
        tracker.flush().await;

        let all = tracker.get_all();
        assert_eq!(all.len(), 1000);
        assert_eq!(all[0].timestamp, base + chrono::Duration::seconds(1199));
        assert_eq!(all[999].timestamp, base + chrono::Duration::seconds(200));
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_filtered_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = HistoryTracker::open(dir.path(), 100).await;
        tracker.log(entry("x", HistoryStatus::Failed, at(2026, 3, 1, 0))).await;
        tracker.log(entry("x", HistoryStatus::Success, at(2026, 3, 1, 10))).await;
        tracker.log(entry("y", HistoryStatus::Failed, at(2026, 3, 1, 20))).await;
        tracker.log(entry("x", HistoryStatus::Failed, at(2026, 3, 1, 30))).await;

        let hits = tracker.get_filtered(&HistoryFilter {
            cluster: Some("x".into()),
            status: Some(HistoryStatus::Failed),
            ..Default::default()
        });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].timestamp, at(2026, 3, 1, 30));
        assert_eq!(hits[1].timestamp, at(2026, 3, 1, 0));

        let everything = tracker.get_filtered(&HistoryFilter::default());
        assert_eq!(everything.len(), 4);
        assert_eq!(everything[0].cluster, "x");
        assert_eq!(everything[1].cluster, "y");
    }

    #[tokio::test]
    async fn test_cold_start_loads_last_three_months_capped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let writer = HistoryTracker::open(dir.path(), 100).await;
            for (month, count) in [(1u32, 2u32), (2, 2), (3, 3), (4, 2)] {
                for i in 0..count {
                    writer
                        .log(entry("c", HistoryStatus::Success, at(2026, month, 5, i)))
                        .await;
                }
            }
            writer.flush().await;
        }
        std::fs::write(dir.path().join("2026-04").join("2026-04-09-broken.json"), "{").unwrap();

        let now = at(2026, 4, 15, 0);
        let tracker = HistoryTracker::open_at(dir.path(), 100, now).await;
        // January is outside the window, the broken file is skipped
        assert_eq!(tracker.len(), 7);

        let capped = HistoryTracker::open_at(dir.path(), 4, now).await;
        let all = capped.get_all();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].timestamp, at(2026, 4, 5, 1));
        assert_eq!(all[3].timestamp, at(2026, 3, 5, 1));
    }

    #[tokio::test]
    async fn test_clear_wipes_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = HistoryTracker::open(dir.path(), 100).await;
        tracker.log(entry("c", HistoryStatus::Success, at(2026, 1, 1, 0))).await;
        tracker.log(entry("c", HistoryStatus::Success, at(2026, 2, 1, 0))).await;

        tracker.clear().await.unwrap();

        assert!(tracker.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_path_like_ids_stay_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("history");
        let tracker = HistoryTracker::open(&root, 10).await;

        let mut escaping = entry("c", HistoryStatus::Success, at(2026, 3, 1, 0));
        escaping.id = "x/../../../escaped".into();
        let replaced = tracker.log(escaping).await;
        let mut dots = entry("c", HistoryStatus::Success, at(2026, 3, 1, 1));
        dots.id = "..".into();
        tracker.log(dots).await;
        let mut kept = entry("c", HistoryStatus::Success, at(2026, 3, 1, 2));
        kept.id = "run-42_a.b".into();
        let kept_id = tracker.log(kept).await;
        tracker.flush().await;

        assert_ne!(replaced, "x/../../../escaped");
        assert!(tracker.get_by_id(&replaced).is_ok());
        assert_eq!(kept_id, "run-42_a.b");
        assert!(tracker.get_all().iter().all(|e| e.id != ".."));

        tracker.clear().await.unwrap();
        let beside_root: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(beside_root, vec![std::ffi::OsString::from("history")]);
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_plain_ids() {
        assert!(is_plain_id("0b9f6c1e-8d1f-4c4e-9d7a-1f2e3d4c5b6a"));
        assert!(!is_plain_id(""));
        assert!(!is_plain_id("."));
        assert!(!is_plain_id("a/b"));
        assert!(!is_plain_id("a\\b"));
    }

    #[tokio::test]
    async fn test_disk_failure_never_reaches_caller() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let tracker = HistoryTracker::open(&blocker, 10).await;
        let id = tracker
            .log(HistoryEntry::new(HistoryAction::ApplyBatch, "c", "r"))
            .await;
        tracker.flush().await;

        assert!(tracker.get_by_id(&id).is_ok());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = HistoryTracker::open(dir.path(), 100).await;
        tracker.log(entry("a", HistoryStatus::Success, at(2026, 3, 1, 0))).await;
        tracker.log(entry("a", HistoryStatus::Failed, at(2026, 3, 1, 1))).await;
        let mut other = entry("b", HistoryStatus::Partial, at(2026, 3, 1, 2));
        other.action = HistoryAction::UpdateHpa;
        tracker.log(other).await;

        let stats = tracker.stats();
        assert_eq!(stats.total, 3);
        assert_eq!((stats.success, stats.failed, stats.partial), (1, 1, 1));
        assert_eq!(stats.by_action[&HistoryAction::ApplyNodepool], 2);
        assert_eq!(stats.by_cluster["b"], 1);
        assert!(matches!(
            tracker.get_by_id("missing"),
            Err(Error::NotFound { .. })
        ));
    }
}
