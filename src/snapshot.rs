//! Pre-mutation snapshots and their durable store.
//!
//! A snapshot entry is captured *before* each item mutates the filesystem
//! and holds exactly enough state to reverse that one item. Entries are
//! grouped by operation id, persisted as one JSON file per operation so
//! undo survives process restarts, and expire 24 hours after capture.
//! Expired operations are purged together with their trash payload; that
//! purge is the only point where deleted data becomes unrecoverable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::batch::OpKind;
use crate::error::Result;
use crate::trash::TrashArea;

/// Kind-specific reversal data.
///
/// Closed variant set mirroring [`OpKind`]: the rollback coordinator
/// matches exhaustively, so a new operation kind cannot ship without its
/// inverse.
///
/// `created_parent` is the topmost directory the executor had to create to
/// hold the destination (or the mkdir chain); rollback removes the whole
/// then-empty chain beneath it so implicitly created parents do not
/// outlive the item they were made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReversalData {
    /// MOVE/RENAME: put `to` back at `from`.
    Moved {
        from: PathBuf,
        to: PathBuf,
        created_parent: Option<PathBuf>,
    },
    /// COPY: delete the created copy; the original was never touched.
    Copied {
        created: PathBuf,
        created_parent: Option<PathBuf>,
    },
    /// DELETE: move the payload back out of the trash.
    Trashed { original: PathBuf, trash_path: PathBuf },
    /// CREATE: delete the created file, but only if its size still matches
    /// what we wrote (otherwise someone else modified it).
    Created {
        path: PathBuf,
        len: u64,
        created_parent: Option<PathBuf>,
    },
    /// MKDIR: remove the directory, but only if it is still empty.
    DirCreated {
        path: PathBuf,
        created_parent: Option<PathBuf>,
    },
}

/// One reversible item of one executed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub operation_id: Uuid,
    pub item_index: usize,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reversal: ReversalData,
}

impl SnapshotEntry {
    pub fn new(
        operation_id: Uuid,
        item_index: usize,
        retention: Duration,
        reversal: ReversalData,
    ) -> Self {
        let captured_at = Utc::now();
        Self {
            operation_id,
            item_index,
            captured_at,
            expires_at: captured_at + retention,
            reversal,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// All snapshot state for one operation, as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub operation_id: Uuid,
    pub kind: OpKind,
    pub actor: String,
    pub entries: Vec<SnapshotEntry>,
}

impl OperationSnapshot {
    /// The operation is expired once every entry is.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().all(|e| e.is_expired(now))
    }

    fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.captured_at).max()
    }
}

/// Durable store of operation snapshots.
///
/// Interior mutex; `get` hands out owned copies so a concurrent purge can
/// never tear an in-flight read. Operations on distinct ids only contend on
/// the brief map access, not on each other's file I/O payloads.
pub struct SnapshotStore {
    dir: PathBuf,
    retention: Duration,
    trash: Arc<TrashArea>,
    ops: Mutex<HashMap<Uuid, OperationSnapshot>>,
}

impl SnapshotStore {
    /// Opens the store, reloading any snapshots persisted by a previous
    /// process so undo keeps working across restarts.
    pub fn open(dir: impl Into<PathBuf>, retention: Duration, trash: Arc<TrashArea>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut ops = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(snapshot) => {
                    ops.insert(snapshot.operation_id, snapshot);
                }
                Err(e) => {
                    log::warn!("Skipping unreadable snapshot {}: {e}", path.display());
                }
            }
        }

        log::info!("Snapshot store opened with {} pending operation(s)", ops.len());

        Ok(Self {
            dir,
            retention,
            trash,
            ops: Mutex::new(ops),
        })
    }

    fn load_file(path: &Path) -> Result<OperationSnapshot> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn file_for(&self, operation_id: Uuid) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Captures one reversal entry. The entry is durable on disk before
    /// this returns, so a crash mid-batch cannot orphan an applied
    /// mutation.
    pub fn put(
        &self,
        operation_id: Uuid,
        kind: OpKind,
        actor: &str,
        item_index: usize,
        reversal: ReversalData,
    ) -> Result<SnapshotEntry> {
        let entry = SnapshotEntry::new(operation_id, item_index, self.retention, reversal);

        let mut ops = self.ops.lock().expect("snapshot store lock poisoned");
        let snapshot = ops.entry(operation_id).or_insert_with(|| OperationSnapshot {
            operation_id,
            kind,
            actor: actor.to_string(),
            entries: Vec::new(),
        });
        snapshot.entries.push(entry.clone());
        self.persist(snapshot)?;

        Ok(entry)
    }

    fn persist(&self, snapshot: &OperationSnapshot) -> Result<()> {
        let path = self.file_for(snapshot.operation_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Drops a single entry whose mutation never applied.
    ///
    /// Snapshots are captured *before* mutating; when the mutation itself
    /// fails the entry must not survive, or rollback would try to reverse
    /// an item that never happened.
    pub fn discard_entry(&self, operation_id: Uuid, item_index: usize) -> Result<()> {
        let mut ops = self.ops.lock().expect("snapshot store lock poisoned");
        let remaining = match ops.get_mut(&operation_id) {
            Some(snapshot) => {
                snapshot.entries.retain(|e| e.item_index != item_index);
                if snapshot.entries.is_empty() {
                    None
                } else {
                    Some(snapshot.clone())
                }
            }
            None => return Ok(()),
        };

        match remaining {
            Some(snapshot) => self.persist(&snapshot)?,
            None => {
                ops.remove(&operation_id);
                let path = self.file_for(operation_id);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Returns an owned copy of the operation's non-expired snapshot, or
    /// `None` if unknown, consumed, or fully expired.
    pub fn get(&self, operation_id: Uuid, now: DateTime<Utc>) -> Option<OperationSnapshot> {
        let ops = self.ops.lock().expect("snapshot store lock poisoned");
        ops.get(&operation_id)
            .filter(|snapshot| !snapshot.is_expired(now))
            .cloned()
    }

    /// Removes and returns the operation's snapshot. An operation can only
    /// be rolled back once; consuming the entries is what enforces that.
    pub fn consume(&self, operation_id: Uuid) -> Result<Option<OperationSnapshot>> {
        let snapshot = {
            let mut ops = self.ops.lock().expect("snapshot store lock poisoned");
            ops.remove(&operation_id)
        };

        if snapshot.is_some() {
            let path = self.file_for(operation_id);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        Ok(snapshot)
    }

    /// The most recently captured, still-live operation ("undo my last
    /// operation").
    pub fn latest_operation(&self, now: DateTime<Utc>) -> Option<Uuid> {
        let ops = self.ops.lock().expect("snapshot store lock poisoned");
        ops.values()
            .filter(|s| !s.is_expired(now))
            .max_by_key(|s| s.captured_at())
            .map(|s| s.operation_id)
    }

    /// Number of operations still eligible for rollback.
    pub fn pending_count(&self, now: DateTime<Utc>) -> usize {
        let ops = self.ops.lock().expect("snapshot store lock poisoned");
        ops.values().filter(|s| !s.is_expired(now)).count()
    }

    /// Purges every expired operation: snapshot file, in-memory entries,
    /// and, for DELETE entries, the trashed payload itself.
    ///
    /// Returns the number of operations purged.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<OperationSnapshot> = {
            let mut ops = self.ops.lock().expect("snapshot store lock poisoned");
            let ids: Vec<Uuid> = ops
                .values()
                .filter(|s| s.is_expired(now))
                .map(|s| s.operation_id)
                .collect();
            ids.iter().filter_map(|id| ops.remove(id)).collect()
        };

        for snapshot in &expired {
            let had_trash = snapshot
                .entries
                .iter()
                .any(|e| matches!(e.reversal, ReversalData::Trashed { .. }));
            if had_trash {
                if let Err(e) = self.trash.purge_operation(snapshot.operation_id) {
                    log::error!(
                        "Failed to purge trash payload for {}: {e}",
                        snapshot.operation_id
                    );
                }
            }

            let path = self.file_for(snapshot.operation_id);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            log::info!(
                "Expired snapshot purged: {} ({} entries)",
                snapshot.operation_id,
                snapshot.entries.len()
            );
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SnapshotStore {
        let trash = Arc::new(TrashArea::open(temp.path().join("trash")).unwrap());
        SnapshotStore::open(temp.path().join("snapshots"), Duration::hours(24), trash).unwrap()
    }

    fn moved(from: &str, to: &str) -> ReversalData {
        ReversalData::Moved {
            from: PathBuf::from(from),
            to: PathBuf::from(to),
            created_parent: None,
        }
    }

    #[test]
    fn test_put_then_get_returns_entries_in_order() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        let op = Uuid::new_v4();

        s.put(op, OpKind::Move, "tester", 0, moved("/a/1", "/b/1")).unwrap();
        s.put(op, OpKind::Move, "tester", 1, moved("/a/2", "/b/2")).unwrap();

        let snapshot = s.get(op, Utc::now()).unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[0].item_index, 0);
        assert_eq!(snapshot.entries[1].item_index, 1);
    }

    #[test]
    fn test_unknown_operation_returns_none() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        assert!(s.get(Uuid::new_v4(), Utc::now()).is_none());
    }

    #[test]
    fn test_consume_is_single_shot() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        let op = Uuid::new_v4();
        s.put(op, OpKind::Move, "tester", 0, moved("/a", "/b")).unwrap();

        assert!(s.consume(op).unwrap().is_some());
        assert!(s.consume(op).unwrap().is_none());
        assert!(s.get(op, Utc::now()).is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let op = Uuid::new_v4();
        {
            let s = store(&temp);
            s.put(op, OpKind::Delete, "tester", 0, moved("/a", "/b")).unwrap();
        }

        let s = store(&temp);
        let snapshot = s.get(op, Utc::now()).unwrap();
        assert_eq!(snapshot.kind, OpKind::Delete);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[test]
    fn test_expired_operation_invisible_to_get() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        let op = Uuid::new_v4();
        s.put(op, OpKind::Move, "tester", 0, moved("/a", "/b")).unwrap();

        let future = Utc::now() + Duration::hours(25);
        assert!(s.get(op, future).is_none());
        assert!(s.get(op, Utc::now()).is_some());
    }

    #[test]
    fn test_purge_expired_removes_file_and_trash_payload() {
        let temp = TempDir::new().unwrap();
        let trash = Arc::new(TrashArea::open(temp.path().join("trash")).unwrap());
        let s = SnapshotStore::open(
            temp.path().join("snapshots"),
            Duration::hours(24),
            Arc::clone(&trash),
        )
        .unwrap();

        let op = Uuid::new_v4();
        let victim = temp.path().join("victim.txt");
        fs::write(&victim, "data").unwrap();
        let slot = trash.trash(op, 0, &victim).unwrap();
        s.put(
            op,
            OpKind::Delete,
            "tester",
            0,
            ReversalData::Trashed {
                original: victim,
                trash_path: slot.clone(),
            },
        )
        .unwrap();

        let purged = s.purge_expired(Utc::now() + Duration::hours(25)).unwrap();
        assert_eq!(purged, 1);
        assert!(s.get(op, Utc::now()).is_none());
        assert!(!slot.exists());
        assert!(!temp.path().join("snapshots").join(format!("{op}.json")).exists());
    }

    #[test]
    fn test_purge_leaves_live_operations_alone() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        let op = Uuid::new_v4();
        s.put(op, OpKind::Move, "tester", 0, moved("/a", "/b")).unwrap();

        let purged = s.purge_expired(Utc::now()).unwrap();
        assert_eq!(purged, 0);
        assert!(s.get(op, Utc::now()).is_some());
    }

    #[test]
    fn test_latest_operation_picks_most_recent() {
        let temp = TempDir::new().unwrap();
        let s = store(&temp);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        s.put(first, OpKind::Move, "tester", 0, moved("/a", "/b")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.put(second, OpKind::Copy, "tester", 0, moved("/c", "/d")).unwrap();

        assert_eq!(s.latest_operation(Utc::now()), Some(second));
        assert_eq!(s.pending_count(Utc::now()), 2);
    }
}
