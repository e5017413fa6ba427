//! Rollback of previously executed operations.
//!
//! Given an operation id, the coordinator takes that operation's snapshot
//! entries and reverses each in **reverse index order**, undoing the
//! last-applied item first so dependent renames and moves unwind correctly.
//! Each reversal is best-effort: one item failing to reverse (destination
//! reoccupied, payload gone) is recorded and never stops the rest.
//!
//! The snapshot is consumed atomically up front, which is what makes a
//! second rollback of the same operation fail with OPERATION_NOT_FOUND
//! instead of double-applying reversals.

use chrono::{DateTime, Utc};
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::batch::{BatchSummary, ItemError, ItemResult};
use crate::error::{EngineError, OpErrorKind, Result};
use crate::snapshot::{OperationSnapshot, ReversalData, SnapshotEntry, SnapshotStore};
use crate::trash::TrashArea;

/// Reverses executed operations from their snapshots.
pub struct RollbackCoordinator {
    store: Arc<SnapshotStore>,
    audit: Arc<AuditLog>,
    trash: Arc<TrashArea>,
}

impl RollbackCoordinator {
    pub fn new(store: Arc<SnapshotStore>, audit: Arc<AuditLog>, trash: Arc<TrashArea>) -> Self {
        Self {
            store,
            audit,
            trash,
        }
    }

    /// Rolls back one operation. Expiry is enforced first: snapshots past
    /// their window are purged (trash payload included) before the lookup,
    /// so an expired id fails with OPERATION_NOT_FOUND and leaves nothing
    /// recoverable behind.
    pub fn rollback(&self, operation_id: Uuid, now: DateTime<Utc>) -> Result<BatchSummary> {
        self.store.purge_expired(now)?;

        // Check liveness, then take ownership. Two concurrent rollbacks can
        // both pass the check, but only one gets the consumed snapshot.
        if self.store.get(operation_id, now).is_none() {
            return Err(EngineError::OperationNotFound(operation_id));
        }
        let Some(snapshot) = self.store.consume(operation_id)? else {
            return Err(EngineError::OperationNotFound(operation_id));
        };

        log::info!(
            "Rolling back {} operation {} ({} entries)",
            snapshot.kind,
            operation_id,
            snapshot.entries.len()
        );

        let mut results = Vec::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries.iter().rev() {
            let result = self.reverse_entry(entry);
            self.audit.append(&AuditRecord::new(
                operation_id,
                Some(entry.item_index),
                AuditAction::RolledBack,
                &snapshot.actor,
                match &result.error {
                    Some(e) => format!("FAILED {}: {}", e.kind, e.message),
                    None => "SUCCEEDED".to_string(),
                },
                result.paths.clone(),
            ))?;
            results.push(result);
        }

        let summary = BatchSummary::from_results(operation_id, snapshot.kind, results);

        self.audit.append(&AuditRecord::new(
            operation_id,
            None,
            AuditAction::RolledBack,
            &snapshot.actor,
            summary.outcome(),
            Vec::new(),
        ))?;

        self.cleanup_trash_dir(&snapshot, &summary);

        log::info!("Rollback of {} finished: {}", operation_id, summary.outcome());
        Ok(summary)
    }

    /// Rolls back the most recently executed, still-live operation.
    pub fn rollback_latest(&self, now: DateTime<Utc>) -> Result<BatchSummary> {
        self.store.purge_expired(now)?;
        let operation_id = self
            .store
            .latest_operation(now)
            .ok_or(EngineError::OperationNotFound(Uuid::nil()))?;
        self.rollback(operation_id, now)
    }

    /// Applies the kind-specific inverse for one entry.
    fn reverse_entry(&self, entry: &SnapshotEntry) -> ItemResult {
        let index = entry.item_index;
        match &entry.reversal {
            ReversalData::Moved {
                from,
                to,
                created_parent,
            } => {
                let paths = vec![to.clone(), from.clone()];
                if !to.exists() {
                    return ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::NotFound,
                            format!("moved file no longer at {}", to.display()),
                        ),
                    );
                }
                if from.exists() {
                    return ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::AlreadyExists,
                            format!("original location reoccupied: {}", from.display()),
                        ),
                    );
                }
                match crate::trash::move_path(to, from) {
                    Ok(()) => {
                        if let Some(root) = created_parent {
                            remove_created_chain(to, root);
                        }
                        ItemResult::succeeded(index, paths, false)
                    }
                    Err(e) => ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(OpErrorKind::Io, format!("restore failed: {e}")),
                    ),
                }
            }

            ReversalData::Copied {
                created,
                created_parent,
            } => {
                let paths = vec![created.clone()];
                // Copy reversal is deletion of the copy; the original was
                // never touched. Already gone counts as done.
                let outcome = if created.is_dir() {
                    fs::remove_dir_all(created)
                } else if created.exists() {
                    fs::remove_file(created)
                } else {
                    Ok(())
                };
                match outcome {
                    Ok(()) => {
                        if let Some(root) = created_parent {
                            remove_created_chain(created, root);
                        }
                        ItemResult::succeeded(index, paths, false)
                    }
                    Err(e) => ItemResult::failed(
                        index,
                        paths,
                        ItemError::from_io(&e, format!("remove copy {}", created.display())),
                    ),
                }
            }

            ReversalData::Trashed {
                original,
                trash_path,
            } => {
                let paths = vec![trash_path.clone(), original.clone()];
                if !trash_path.exists() {
                    return ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::NotFound,
                            format!("trash payload missing: {}", trash_path.display()),
                        ),
                    );
                }
                if original.exists() {
                    return ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::AlreadyExists,
                            format!("original location reoccupied: {}", original.display()),
                        ),
                    );
                }
                match self.trash.restore(trash_path, original) {
                    Ok(()) => ItemResult::succeeded(index, paths, false),
                    Err(e) => ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(OpErrorKind::Io, format!("restore failed: {e}")),
                    ),
                }
            }

            ReversalData::Created {
                path,
                len,
                created_parent,
            } => {
                let paths = vec![path.clone()];
                match fs::metadata(path) {
                    // Already gone: the goal state holds.
                    Err(_) => ItemResult::succeeded(index, paths, false),
                    Ok(meta) if meta.len() != *len => ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::PathModified,
                            format!(
                                "{} was modified after creation ({} bytes, expected {})",
                                path.display(),
                                meta.len(),
                                len
                            ),
                        ),
                    ),
                    Ok(_) => match fs::remove_file(path) {
                        Ok(()) => {
                            if let Some(root) = created_parent {
                                remove_created_chain(path, root);
                            }
                            ItemResult::succeeded(index, paths, false)
                        }
                        Err(e) => ItemResult::failed(
                            index,
                            paths,
                            ItemError::from_io(&e, format!("remove {}", path.display())),
                        ),
                    },
                }
            }

            ReversalData::DirCreated {
                path,
                created_parent,
            } => {
                let paths = vec![path.clone()];
                if !path.exists() {
                    return ItemResult::succeeded(index, paths, false);
                }
                let occupied = match fs::read_dir(path) {
                    Ok(mut entries) => entries.next().is_some(),
                    Err(e) => {
                        return ItemResult::failed(
                            index,
                            paths,
                            ItemError::from_io(&e, format!("inspect {}", path.display())),
                        );
                    }
                };
                if occupied {
                    return ItemResult::failed(
                        index,
                        paths,
                        ItemError::new(
                            OpErrorKind::PathModified,
                            format!("directory no longer empty: {}", path.display()),
                        ),
                    );
                }
                match fs::remove_dir(path) {
                    Ok(()) => {
                        if let Some(root) = created_parent {
                            remove_created_chain(path, root);
                        }
                        ItemResult::succeeded(index, paths, false)
                    }
                    Err(e) => ItemResult::failed(
                        index,
                        paths,
                        ItemError::from_io(&e, format!("remove dir {}", path.display())),
                    ),
                }
            }
        }
    }

    /// Removes the operation's now-empty trash directory after every
    /// payload was restored. Failed restores keep their payload in place;
    /// those are logged and left for the host to inspect, since the
    /// consumed snapshot can no longer reach them.
    fn cleanup_trash_dir(&self, snapshot: &OperationSnapshot, summary: &BatchSummary) {
        let had_trash = snapshot
            .entries
            .iter()
            .any(|e| matches!(e.reversal, ReversalData::Trashed { .. }));
        if !had_trash {
            return;
        }

        let all_restored = summary
            .results
            .iter()
            .all(|r| r.is_success());
        if all_restored {
            if let Err(e) = self.trash.purge_operation(snapshot.operation_id) {
                log::warn!(
                    "Could not remove empty trash dir for {}: {e}",
                    snapshot.operation_id
                );
            }
        } else {
            log::warn!(
                "Rollback of {} left unrestored payload in trash",
                snapshot.operation_id
            );
        }
    }
}

/// Removes the directory chain that was created to hold `leaf`, walking
/// up from `leaf`'s parent to `created_root` inclusive. Only empty
/// directories go; a directory another operation has since filled stays,
/// and ends the walk.
fn remove_created_chain(leaf: &std::path::Path, created_root: &std::path::Path) {
    let mut cur = leaf.parent();
    while let Some(dir) = cur {
        if !dir.starts_with(created_root) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        log::debug!("Removed created dir {}", dir.display());
        if dir == created_root {
            break;
        }
        cur = dir.parent();
    }
}
