//! Confirmation gate for destructive and bulk batches.
//!
//! A held batch sits in PENDING until the actor relays the exact
//! affirmative token (`confirm delete` for DELETE, `yes` otherwise),
//! explicitly denies it, or the short confirmation window lapses. The gate
//! never parses free text; turning "yeah go ahead" into a token is the
//! intent-translation layer's job. A confirmation must name the *most
//! recent* pending operation for its actor; stale or ambiguous
//! confirmations are rejected rather than guessed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::batch::{BatchRequest, OpKind};
use crate::error::{EngineError, Result};

/// Terminal states a pending confirmation can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Denied,
    Expired,
}

/// A batch held pending explicit acknowledgment.
#[derive(Debug)]
struct PendingConfirmation {
    request: BatchRequest,
    required_token: &'static str,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl PendingConfirmation {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// How long a terminal resolution stays distinguishable from an unknown
/// id, as a multiple of the confirmation TTL. Evicted by the sweep so the
/// map stays bounded in a long-lived engine.
const RESOLVED_TTL_FACTOR: i32 = 4;

#[derive(Default)]
struct GateState {
    pending: HashMap<Uuid, PendingConfirmation>,
    /// Most recent pending operation per actor; confirmations must match it.
    latest_per_actor: HashMap<String, Uuid>,
    /// Operations that recently reached a terminal state, so a duplicate
    /// confirm is ALREADY_RESOLVED instead of unknown. Entries are evicted
    /// `RESOLVED_TTL_FACTOR` windows after resolution.
    resolved: HashMap<Uuid, (Resolution, DateTime<Utc>)>,
}

/// Hold-and-release mechanism guarding destructive batches.
pub struct ConfirmationGate {
    ttl: chrono::Duration,
    state: Mutex<GateState>,
}

impl ConfirmationGate {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Holds a batch, returning the prompt the host should surface.
    ///
    /// `runnable` is the number of items that passed screening; the prompt
    /// quotes it rather than the raw batch size so the actor confirms what
    /// will actually run.
    pub fn hold(&self, request: BatchRequest, runnable: usize) -> String {
        let now = Utc::now();
        let prompt = confirmation_prompt(request.kind, runnable);
        let pending = PendingConfirmation {
            required_token: request.kind.required_token(),
            created_at: now,
            expires_at: now + self.ttl,
            request,
        };

        let mut state = self.state.lock().expect("confirmation gate lock poisoned");
        let id = pending.request.id;
        let actor = pending.request.actor.clone();
        log::info!(
            "Holding {} batch {} for confirmation (actor={}, expires {})",
            pending.request.kind,
            id,
            actor,
            pending.expires_at
        );
        state.pending.insert(id, pending);
        state.latest_per_actor.insert(actor, id);
        prompt
    }

    /// Releases a held batch if `token` matches, consuming the pending
    /// state. Returns the batch for the executor to run.
    ///
    /// A wrong token leaves the batch pending so the actor may retry
    /// within the window; everything else is terminal.
    pub fn take_confirmed(&self, operation_id: Uuid, token: &str, now: DateTime<Utc>) -> Result<BatchRequest> {
        let mut state = self.state.lock().expect("confirmation gate lock poisoned");

        if let Some((resolution, _)) = state.resolved.get(&operation_id) {
            log::warn!("Duplicate confirmation for {operation_id} ({resolution:?})");
            return Err(EngineError::AlreadyResolved(operation_id));
        }

        let Some(pending) = state.pending.get(&operation_id) else {
            return Err(EngineError::OperationNotFound(operation_id));
        };

        if pending.is_expired(now) {
            log::info!(
                "Confirmation for {operation_id} arrived too late (held since {})",
                pending.created_at
            );
            let actor = pending.request.actor.clone();
            state.pending.remove(&operation_id);
            state.resolved.insert(operation_id, (Resolution::Expired, now));
            Self::clear_latest(&mut state, &actor, operation_id);
            return Err(EngineError::ConfirmationExpired(operation_id));
        }

        let actor = pending.request.actor.clone();
        if state.latest_per_actor.get(&actor) != Some(&operation_id) {
            return Err(EngineError::StaleConfirmation(
                operation_id,
                "a newer request from this actor is pending".to_string(),
            ));
        }

        if token.trim() != pending.required_token {
            return Err(EngineError::TokenMismatch(operation_id));
        }

        let pending = state
            .pending
            .remove(&operation_id)
            .expect("pending entry vanished under lock");
        state
            .resolved
            .insert(operation_id, (Resolution::Confirmed, now));
        Self::clear_latest(&mut state, &actor, operation_id);
        log::info!("Batch {operation_id} confirmed");
        Ok(pending.request)
    }

    /// Explicit negative acknowledgment. The batch is discarded and never
    /// executes.
    pub fn deny(&self, operation_id: Uuid) -> Result<BatchRequest> {
        let mut state = self.state.lock().expect("confirmation gate lock poisoned");

        if state.resolved.contains_key(&operation_id) {
            return Err(EngineError::AlreadyResolved(operation_id));
        }

        let pending = state
            .pending
            .remove(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        let actor = pending.request.actor.clone();
        state
            .resolved
            .insert(operation_id, (Resolution::Denied, Utc::now()));
        Self::clear_latest(&mut state, &actor, operation_id);
        log::info!("Batch {operation_id} denied by actor");
        Ok(pending.request)
    }

    /// Drops every pending confirmation whose window has lapsed, and
    /// evicts resolutions old enough that nothing will legitimately ask
    /// about them again. Returns the discarded requests so the caller can
    /// audit them.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<BatchRequest> {
        let mut state = self.state.lock().expect("confirmation gate lock poisoned");

        let expired_ids: Vec<Uuid> = state
            .pending
            .values()
            .filter(|p| p.is_expired(now))
            .map(|p| p.request.id)
            .collect();

        let mut discarded = Vec::new();
        for id in expired_ids {
            if let Some(pending) = state.pending.remove(&id) {
                let actor = pending.request.actor.clone();
                state.resolved.insert(id, (Resolution::Expired, now));
                Self::clear_latest(&mut state, &actor, id);
                log::info!("Pending confirmation {id} expired unacknowledged");
                discarded.push(pending.request);
            }
        }

        let horizon = self.ttl * RESOLVED_TTL_FACTOR;
        state
            .resolved
            .retain(|_, (_, resolved_at)| *resolved_at + horizon > now);

        discarded
    }

    /// Number of batches currently held.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .expect("confirmation gate lock poisoned")
            .pending
            .len()
    }

    fn clear_latest(state: &mut GateState, actor: &str, operation_id: Uuid) {
        if state.latest_per_actor.get(actor) == Some(&operation_id) {
            state.latest_per_actor.remove(actor);
        }
    }
}

/// Human-readable prompt describing the held batch.
fn confirmation_prompt(kind: OpKind, count: usize) -> String {
    match kind {
        OpKind::Delete => format!(
            "This will move {count} file(s) to trash. \
             Say 'confirm delete' to proceed or 'cancel' to abort."
        ),
        kind => format!(
            "This will {kind} {count} file(s). Say 'yes' to proceed or 'no' to cancel."
        ),
    }
}
