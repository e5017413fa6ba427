//! The engine facade.
//!
//! Wires the guard, trash area, snapshot store, audit log, confirmation
//! gate, executor and rollback coordinator together with an explicit
//! lifecycle: everything is created by [`Engine::open`], injected into the
//! components that need it, and shared behind an `Arc` so handles are cheap
//! to clone across sessions. There are no ambient globals.
//!
//! The public surface the host integrates against is exactly `execute`,
//! `confirm`, `deny` and `rollback`, plus maintenance entry points for the
//! periodic sweep.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::batch::{BatchRequest, BatchSummary, ExecuteOutcome};
use crate::config::EngineConfig;
use crate::confirm::ConfirmationGate;
use crate::error::Result;
use crate::executor::{CancellationFlag, Executor};
use crate::guard::ProtectedPathGuard;
use crate::rollback::RollbackCoordinator;
use crate::snapshot::SnapshotStore;
use crate::trash::TrashArea;

struct EngineInner {
    config: EngineConfig,
    audit: Arc<AuditLog>,
    store: Arc<SnapshotStore>,
    gate: ConfirmationGate,
    executor: Executor,
    rollback: RollbackCoordinator,
}

/// Operation execution and rollback engine.
///
/// Cloning shares one underlying instance; independent sessions may call
/// into it concurrently. Batches execute sequentially per call, but
/// separate batches do not serialize against each other beyond the brief
/// snapshot-store and audit-writer critical sections.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens the engine: creates the data directories, reloads persisted
    /// snapshots (undo survives restarts), and sweeps anything that expired
    /// while the process was down.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let guard = Arc::new(ProtectedPathGuard::new(&config)?);
        let trash = Arc::new(TrashArea::open(config.trash_dir())?);
        let store = Arc::new(SnapshotStore::open(
            config.snapshots_dir(),
            config.snapshot_retention,
            Arc::clone(&trash),
        )?);
        let audit = Arc::new(AuditLog::open(config.audit_dir())?);
        let gate = ConfirmationGate::new(config.confirmation_ttl);

        let executor = Executor::new(
            Arc::clone(&guard),
            Arc::clone(&store),
            Arc::clone(&audit),
            Arc::clone(&trash),
            config.max_batch_size,
        );
        let rollback =
            RollbackCoordinator::new(Arc::clone(&store), Arc::clone(&audit), Arc::clone(&trash));

        store.purge_expired(Utc::now())?;
        log::info!("Engine opened at {}", config.data_dir.display());

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                audit,
                store,
                gate,
                executor,
                rollback,
            }),
        })
    }

    /// Submits a batch. Every item is screened through the guard first;
    /// items naming protected paths are denied (and audited) before the
    /// batch is held or run. Destructive or bulk batches with at least one
    /// admissible item are then held by the confirmation gate; everything
    /// else executes immediately.
    pub fn execute(&self, request: BatchRequest) -> Result<ExecuteOutcome> {
        self.execute_with(request, &CancellationFlag::new())
    }

    /// Like [`execute`](Self::execute), with a caller-held cancellation
    /// flag. Cancelling stops the batch before its next item; the item in
    /// flight runs to completion.
    pub fn execute_with(
        &self,
        request: BatchRequest,
        cancel: &CancellationFlag,
    ) -> Result<ExecuteOutcome> {
        self.inner.executor.validate_request(&request)?;

        self.inner.audit.append(&AuditRecord::new(
            request.id,
            None,
            AuditAction::Requested,
            &request.actor,
            format!("{} batch of {} item(s)", request.kind, request.items.len()),
            Vec::new(),
        ))?;

        // Guard verdicts land before the gate: a protected item is denied
        // at request time, never counted into the prompt, and never held.
        let denied = self.inner.executor.precheck(&request);
        self.inner.executor.audit_denied(&request, &denied)?;
        let runnable = denied.iter().filter(|d| d.is_none()).count();

        if runnable > 0 && request.requires_confirmation(self.inner.config.confirm_file_count) {
            let operation_id = request.id;
            let prompt = self.inner.gate.hold(request, runnable);
            return Ok(ExecuteOutcome::AwaitingConfirmation {
                operation_id,
                prompt,
            });
        }

        let summary = self.inner.executor.run_screened(&request, &denied, cancel)?;
        Ok(ExecuteOutcome::Executed(summary))
    }

    /// Releases a held batch with the actor's affirmative token and runs
    /// it. The token must match the most recent pending request for that
    /// actor exactly; duplicates return ALREADY_RESOLVED.
    pub fn confirm(&self, operation_id: Uuid, token: &str) -> Result<BatchSummary> {
        let request = self
            .inner
            .gate
            .take_confirmed(operation_id, token, Utc::now())?;

        self.inner.audit.append(&AuditRecord::new(
            operation_id,
            None,
            AuditAction::Confirmed,
            &request.actor,
            "token accepted".to_string(),
            Vec::new(),
        ))?;

        // Guard verdicts were audited when the request came in; recompute
        // them here only to keep screened-out items from running.
        let denied = self.inner.executor.precheck(&request);
        self.inner
            .executor
            .run_screened(&request, &denied, &CancellationFlag::new())
    }

    /// Explicitly denies a held batch. It is discarded and never executes.
    pub fn deny(&self, operation_id: Uuid) -> Result<()> {
        let request = self.inner.gate.deny(operation_id)?;
        self.inner.audit.append(&AuditRecord::new(
            operation_id,
            None,
            AuditAction::Denied,
            &request.actor,
            "denied by actor".to_string(),
            Vec::new(),
        ))
    }

    /// Reverses a previously executed operation within the retention
    /// window. An operation can only be rolled back once.
    pub fn rollback(&self, operation_id: Uuid) -> Result<BatchSummary> {
        self.inner.rollback.rollback(operation_id, Utc::now())
    }

    /// Reverses the most recent still-undoable operation.
    pub fn rollback_latest(&self) -> Result<BatchSummary> {
        self.inner.rollback.rollback_latest(Utc::now())
    }

    /// Maintenance sweep: purges expired snapshots (permanently deleting
    /// their trash payloads) and discards unacknowledged confirmations.
    /// Hosts call this periodically; expiry is additionally enforced on
    /// every rollback, so a missed sweep never extends the undo window.
    pub fn sweep(&self) -> Result<usize> {
        let now = Utc::now();

        for request in self.inner.gate.expire_stale(now) {
            self.inner.audit.append(&AuditRecord::new(
                request.id,
                None,
                AuditAction::Denied,
                &request.actor,
                "confirmation expired unacknowledged".to_string(),
                Vec::new(),
            ))?;
        }

        self.inner.store.purge_expired(now)
    }

    /// Number of operations still eligible for undo.
    pub fn pending_undo_count(&self) -> usize {
        self.inner.store.pending_count(Utc::now())
    }

    /// Number of batches held awaiting confirmation.
    pub fn pending_confirmation_count(&self) -> usize {
        self.inner.gate.pending_count()
    }

    /// Read access to the audit trail.
    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }
}
