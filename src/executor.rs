//! Batch execution.
//!
//! Every item is screened through the guard via [`Executor::precheck`]
//! before the batch is scheduled (or held for confirmation); screened-out
//! items never run. The surviving items then execute strictly in request
//! order, one at a time: the executor re-validates paths through the guard,
//! captures a snapshot entry *before* mutating, performs the mutation, then
//! records an [`ItemResult`] and one audit record. A single item's failure
//! never aborts the batch: users asking to organize 47 files expect 46
//! successes even if one is locked.
//!
//! ## Ordering
//!
//! Execution order is stable and deterministic so that rollback's
//! reverse-order unwind of dependent renames is well-defined.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::batch::{BatchItem, BatchRequest, BatchSummary, ItemError, ItemResult, OpKind};
use crate::error::{EngineError, OpErrorKind, Result};
use crate::guard::ProtectedPathGuard;
use crate::snapshot::{ReversalData, SnapshotStore};
use crate::trash::{self, TrashArea};

/// Cooperative cancellation for an in-flight batch.
///
/// Checked before each item starts; an item already mutating runs to
/// completion, so no mutation is ever left half-applied without a recorded
/// outcome.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Applies a batch of filesystem mutations, snapshot-first.
pub struct Executor {
    guard: Arc<ProtectedPathGuard>,
    store: Arc<SnapshotStore>,
    audit: Arc<AuditLog>,
    trash: Arc<TrashArea>,
    max_batch_size: usize,
}

impl Executor {
    pub fn new(
        guard: Arc<ProtectedPathGuard>,
        store: Arc<SnapshotStore>,
        audit: Arc<AuditLog>,
        trash: Arc<TrashArea>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            guard,
            store,
            audit,
            trash,
            max_batch_size,
        }
    }

    /// Rejects malformed or oversized requests before anything executes.
    pub fn validate_request(&self, request: &BatchRequest) -> Result<()> {
        if request.items.is_empty() {
            return Err(EngineError::Validation("batch has no items".to_string()));
        }
        if request.items.len() > self.max_batch_size {
            return Err(EngineError::Validation(format!(
                "batch of {} items exceeds the maximum of {}",
                request.items.len(),
                self.max_batch_size
            )));
        }
        Ok(())
    }

    /// Screens every path of every item through the guard, without touching
    /// the filesystem. The result is index-aligned with the request's
    /// items: `Some` marks an item that must not run.
    pub fn precheck(&self, request: &BatchRequest) -> Vec<Option<ItemError>> {
        request
            .items
            .iter()
            .map(|item| {
                item.paths()
                    .into_iter()
                    .find_map(|path| match self.guard.validate(&path) {
                        Ok(()) => None,
                        Err(EngineError::ProtectedPath { path, reason }) => {
                            log::warn!("Denied: {} ({reason})", path.display());
                            Some(ItemError::new(OpErrorKind::ProtectedPath, reason))
                        }
                        Err(e) => Some(ItemError::new(OpErrorKind::Validation, e.to_string())),
                    })
            })
            .collect()
    }

    /// Appends one DENIED audit record per screened-out item.
    pub fn audit_denied(
        &self,
        request: &BatchRequest,
        denied: &[Option<ItemError>],
    ) -> Result<()> {
        for (index, error) in denied.iter().enumerate() {
            if let Some(error) = error {
                self.audit.append(&AuditRecord::new(
                    request.id,
                    Some(index),
                    AuditAction::Denied,
                    &request.actor,
                    format!("{}: {}", error.kind, error.message),
                    request.items[index].paths(),
                ))?;
            }
        }
        Ok(())
    }

    /// Screens, audits denials, and runs the batch in one call.
    ///
    /// The engine screens and audits at request time instead (so denials
    /// are on record even if the batch is later denied at the gate) and
    /// calls [`run_screened`](Self::run_screened) directly.
    pub fn run(&self, request: &BatchRequest, cancel: &CancellationFlag) -> Result<BatchSummary> {
        let denied = self.precheck(request);
        self.audit_denied(request, &denied)?;
        self.run_screened(request, &denied, cancel)
    }

    /// Runs every item of the batch in order, continuing on error.
    ///
    /// `denied` must come from [`precheck`](Self::precheck); items marked
    /// there become FAILED results without executing and without a second
    /// audit record.
    pub fn run_screened(
        &self,
        request: &BatchRequest,
        denied: &[Option<ItemError>],
        cancel: &CancellationFlag,
    ) -> Result<BatchSummary> {
        self.validate_request(request)?;

        log::info!(
            "Executing {} batch {} ({} items, actor={})",
            request.kind,
            request.id,
            request.items.len(),
            request.actor
        );

        let mut results = Vec::with_capacity(request.items.len());
        for (index, item) in request.items.iter().enumerate() {
            if let Some(error) = denied.get(index).and_then(|d| d.as_ref()) {
                // Screened out before scheduling; its DENIED record was
                // already written.
                results.push(ItemResult::failed(index, item.paths(), error.clone()));
                continue;
            }

            let result = if cancel.is_cancelled() {
                ItemResult::skipped(
                    index,
                    item.paths(),
                    ItemError::new(OpErrorKind::Cancelled, "batch cancelled before this item"),
                )
            } else {
                self.run_item(request, index, item)?
            };

            self.audit_item(request, &result)?;
            results.push(result);
        }

        let summary = BatchSummary::from_results(request.id, request.kind, results);

        // Batch-level summary record, item_index = None.
        self.audit.append(&AuditRecord::new(
            request.id,
            None,
            AuditAction::Executed,
            &request.actor,
            summary.outcome(),
            Vec::new(),
        ))?;

        log::info!("Batch {} finished: {}", request.id, summary.outcome());
        Ok(summary)
    }

    fn audit_item(&self, request: &BatchRequest, result: &ItemResult) -> Result<()> {
        let (action, outcome) = match (&result.status, &result.error) {
            (crate::batch::ItemStatus::Failed, Some(e)) if e.kind == OpErrorKind::ProtectedPath => {
                (AuditAction::Denied, format!("{}: {}", e.kind, e.message))
            }
            (_, Some(e)) => (
                AuditAction::Executed,
                format!("{:?} {}: {}", result.status, e.kind, e.message),
            ),
            (_, None) => (AuditAction::Executed, "SUCCEEDED".to_string()),
        };

        self.audit.append(&AuditRecord::new(
            request.id,
            Some(result.index),
            action,
            &request.actor,
            outcome,
            result.paths.clone(),
        ))
    }

    /// Executes one item: guard, snapshot, mutate.
    ///
    /// Only infrastructure failures (snapshot persistence) bubble up as
    /// `Err`; everything the filesystem can throw at one item becomes a
    /// FAILED result.
    fn run_item(&self, request: &BatchRequest, index: usize, item: &BatchItem) -> Result<ItemResult> {
        // Defense in depth: every path re-validated here even though
        // precheck already screened the request.
        for path in item.paths() {
            match self.guard.validate(&path) {
                Ok(()) => {}
                Err(EngineError::ProtectedPath { path, reason }) => {
                    log::warn!("Denied: {} ({reason})", path.display());
                    return Ok(ItemResult::failed(
                        index,
                        item.paths(),
                        ItemError::new(OpErrorKind::ProtectedPath, reason),
                    ));
                }
                Err(e) => {
                    return Ok(ItemResult::failed(
                        index,
                        item.paths(),
                        ItemError::new(OpErrorKind::Validation, e.to_string()),
                    ));
                }
            }
        }

        if let Err(error) = self.check_shape(request.kind, item) {
            return Ok(ItemResult::failed(index, item.paths(), error));
        }

        match self.apply(request, index, item) {
            Ok(()) => Ok(ItemResult::succeeded(index, item.paths(), true)),
            Err(Applied::Rejected(error)) => Ok(ItemResult::failed(index, item.paths(), error)),
            Err(Applied::Fatal(e)) => Err(e),
        }
    }

    /// Structural validation per kind, before any filesystem access.
    fn check_shape(&self, kind: OpKind, item: &BatchItem) -> std::result::Result<(), ItemError> {
        match kind {
            OpKind::Move | OpKind::Copy | OpKind::Rename => {
                if item.dest.is_none() {
                    return Err(ItemError::new(
                        OpErrorKind::Validation,
                        format!("{kind} requires a destination path"),
                    ));
                }
            }
            OpKind::Delete | OpKind::Create | OpKind::Mkdir => {}
        }
        Ok(())
    }

    /// Snapshot-first mutation for one item.
    fn apply(
        &self,
        request: &BatchRequest,
        index: usize,
        item: &BatchItem,
    ) -> std::result::Result<(), Applied> {
        let kind = request.kind;
        let source = &item.source;

        // Compute the reversal entry up front; reject impossible items
        // before the snapshot is written. The topmost not-yet-existing
        // destination ancestor is captured here, before the mutation
        // creates it, so rollback can remove the whole chain.
        let reversal = match kind {
            OpKind::Move | OpKind::Rename => {
                let dest = item.dest.as_ref().expect("shape checked");
                if !source.exists() {
                    return Err(Applied::not_found(source));
                }
                if dest.exists() {
                    return Err(Applied::already_exists(dest));
                }
                ReversalData::Moved {
                    from: source.clone(),
                    to: dest.clone(),
                    created_parent: dest.parent().and_then(first_missing),
                }
            }
            OpKind::Copy => {
                let dest = item.dest.as_ref().expect("shape checked");
                if !source.exists() {
                    return Err(Applied::not_found(source));
                }
                if dest.exists() {
                    return Err(Applied::already_exists(dest));
                }
                ReversalData::Copied {
                    created: dest.clone(),
                    created_parent: dest.parent().and_then(first_missing),
                }
            }
            OpKind::Delete => {
                if !source.exists() {
                    return Err(Applied::not_found(source));
                }
                ReversalData::Trashed {
                    original: source.clone(),
                    trash_path: self.trash.slot(request.id, index, source),
                }
            }
            OpKind::Create => {
                if source.exists() {
                    return Err(Applied::already_exists(source));
                }
                let len = item.contents.as_ref().map(|c| c.len() as u64).unwrap_or(0);
                ReversalData::Created {
                    path: source.clone(),
                    len,
                    created_parent: source.parent().and_then(first_missing),
                }
            }
            OpKind::Mkdir => {
                if source.exists() {
                    return Err(Applied::already_exists(source));
                }
                ReversalData::DirCreated {
                    path: source.clone(),
                    created_parent: source.parent().and_then(first_missing),
                }
            }
        };

        // Snapshot must be durable before the mutation happens.
        self.store
            .put(request.id, kind, &request.actor, index, reversal)
            .map_err(Applied::Fatal)?;

        let mutation = self.mutate(kind, request, index, item);
        if let Err(error) = mutation {
            // The mutation never applied; the snapshot entry must not
            // survive or rollback would reverse a no-op.
            self.store
                .discard_entry(request.id, index)
                .map_err(Applied::Fatal)?;
            return Err(Applied::Rejected(error));
        }

        log::debug!("{} applied: {}", kind, source.display());
        Ok(())
    }

    /// The actual filesystem mutation per kind.
    fn mutate(
        &self,
        kind: OpKind,
        request: &BatchRequest,
        index: usize,
        item: &BatchItem,
    ) -> std::result::Result<(), ItemError> {
        let source = &item.source;
        match kind {
            OpKind::Move | OpKind::Rename => {
                let dest = item.dest.as_ref().expect("shape checked");
                create_parent(dest)?;
                trash::move_path(source, dest)
                    .map_err(|e| item_error(&e, format!("move {}", source.display())))
            }
            OpKind::Copy => {
                let dest = item.dest.as_ref().expect("shape checked");
                create_parent(dest)?;
                let copied = if source.is_dir() {
                    trash::copy_dir_recursive(source, dest)
                        .map_err(|e| item_error(&e, format!("copy {}", source.display())))
                } else {
                    fs::copy(source, dest)
                        .map(|_| ())
                        .map_err(|e| ItemError::from_io(&e, format!("copy {}", source.display())))
                };
                if copied.is_err() {
                    // The snapshot entry for this item is about to be
                    // discarded; a half-written copy must not outlive it.
                    trash::remove_partial(dest);
                }
                copied
            }
            OpKind::Delete => self
                .trash
                .trash(request.id, index, source)
                .map(|_| ())
                .map_err(|e| item_error(&e, format!("trash {}", source.display()))),
            OpKind::Create => {
                create_parent(source)?;
                let contents = item.contents.as_deref().unwrap_or(&[]);
                fs::write(source, contents)
                    .map_err(|e| ItemError::from_io(&e, format!("create {}", source.display())))
            }
            OpKind::Mkdir => fs::create_dir_all(source)
                .map_err(|e| ItemError::from_io(&e, format!("mkdir {}", source.display()))),
        }
    }
}

/// Internal outcome of applying one item.
enum Applied {
    /// The item failed for an item-scoped reason; the batch continues.
    Rejected(ItemError),
    /// Snapshot/audit infrastructure failed; the batch cannot be trusted to
    /// continue reversibly.
    Fatal(EngineError),
}

impl Applied {
    fn not_found(path: &Path) -> Self {
        Self::Rejected(ItemError::new(
            OpErrorKind::NotFound,
            format!("source does not exist: {}", path.display()),
        ))
    }

    fn already_exists(path: &Path) -> Self {
        Self::Rejected(ItemError::new(
            OpErrorKind::AlreadyExists,
            format!("destination already exists: {}", path.display()),
        ))
    }
}

fn item_error(err: &EngineError, context: String) -> ItemError {
    match err {
        EngineError::Io(io) => ItemError::from_io(io, context),
        other => ItemError::new(OpErrorKind::Io, format!("{context}: {other}")),
    }
}

fn create_parent(path: &Path) -> std::result::Result<(), ItemError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ItemError::from_io(&e, format!("create parent of {}", path.display())))?;
    }
    Ok(())
}

/// Topmost ancestor of `dir` (inclusive) that does not exist yet, or
/// `None` when the whole chain is already present.
fn first_missing(dir: &Path) -> Option<std::path::PathBuf> {
    let mut missing = None;
    let mut cur = Some(dir);
    while let Some(p) = cur {
        if p.as_os_str().is_empty() || p.exists() {
            break;
        }
        missing = Some(p.to_path_buf());
        cur = p.parent();
    }
    missing
}
