//! Batch request and result model.
//!
//! A [`BatchRequest`] is produced by the intent-translation layer and
//! consumed exactly once by the executor. It is immutable after creation;
//! results accumulate separately as [`ItemResult`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::OpErrorKind;

/// The closed set of filesystem mutations the engine performs.
///
/// Exhaustive matches on this enum drive both execution and the per-kind
/// reversal table, so adding a kind forces updating the rollback logic at
/// compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Move,
    Copy,
    Rename,
    Delete,
    Create,
    Mkdir,
}

impl OpKind {
    /// DELETE is the only kind that is destructive in itself; everything
    /// else only becomes confirmable through batch size.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Delete)
    }

    /// The exact affirmative token the conversational layer must relay.
    ///
    /// Destructive kinds demand a stronger phrase, mirroring the voice
    /// surface's "say 'confirm delete' to proceed". Free-text matching is
    /// the caller's problem; this layer compares tokens verbatim.
    pub fn required_token(self) -> &'static str {
        match self {
            Self::Delete => "confirm delete",
            _ => "yes",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Mkdir => "mkdir",
        };
        f.write_str(s)
    }
}

/// One item within a batch.
///
/// `dest` is required for MOVE/COPY/RENAME, ignored otherwise. `contents`
/// carries the payload for CREATE; an empty file is created when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub source: PathBuf,
    #[serde(default)]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub contents: Option<Vec<u8>>,
}

impl BatchItem {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: None,
            contents: None,
        }
    }

    pub fn with_dest(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: Some(dest.into()),
            contents: None,
        }
    }

    pub fn with_contents(source: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            dest: None,
            contents: Some(contents.into()),
        }
    }

    /// All paths this item touches, for validation and auditing.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.source.clone()];
        if let Some(dest) = &self.dest {
            paths.push(dest.clone());
        }
        paths
    }
}

/// A batch of related filesystem operations requested together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub kind: OpKind,
    /// Who asked for this (voice session id, user id). Confirmations are
    /// matched against the most recent pending request per actor.
    pub actor: String,
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    pub fn new(kind: OpKind, actor: impl Into<String>, items: Vec<BatchItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_at: Utc::now(),
            kind,
            actor: actor.into(),
            items,
        }
    }

    /// Whether this batch must pass the confirmation gate before executing.
    ///
    /// DELETE always does; any kind does above the bulk threshold.
    pub fn requires_confirmation(&self, confirm_file_count: usize) -> bool {
        self.kind.is_destructive() || self.items.len() > confirm_file_count
    }
}

/// Per-item outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// A classified per-item failure with human-readable detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: OpErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: OpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(err: &std::io::Error, context: impl std::fmt::Display) -> Self {
        Self {
            kind: OpErrorKind::from_io(err),
            message: format!("{context}: {err}"),
        }
    }
}

/// Per-item outcome. Created during execution, never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub index: usize,
    pub status: ItemStatus,
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub error: Option<ItemError>,
    /// Whether a snapshot entry was captured for this item.
    pub snapshotted: bool,
}

impl ItemResult {
    pub fn succeeded(index: usize, paths: Vec<PathBuf>, snapshotted: bool) -> Self {
        Self {
            index,
            status: ItemStatus::Succeeded,
            paths,
            error: None,
            snapshotted,
        }
    }

    pub fn failed(index: usize, paths: Vec<PathBuf>, error: ItemError) -> Self {
        Self {
            index,
            status: ItemStatus::Failed,
            paths,
            error: Some(error),
            snapshotted: false,
        }
    }

    pub fn skipped(index: usize, paths: Vec<PathBuf>, error: ItemError) -> Self {
        Self {
            index,
            status: ItemStatus::Skipped,
            paths,
            error: Some(error),
            snapshotted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Succeeded
    }
}

/// Summary of an executed (or rolled back) batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub operation_id: Uuid,
    pub kind: OpKind,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ItemResult>,
}

impl BatchSummary {
    pub fn from_results(operation_id: Uuid, kind: OpKind, results: Vec<ItemResult>) -> Self {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for r in &results {
            match r.status {
                ItemStatus::Succeeded => succeeded += 1,
                ItemStatus::Failed => failed += 1,
                ItemStatus::Skipped => skipped += 1,
            }
        }
        Self {
            operation_id,
            kind,
            succeeded,
            failed,
            skipped,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// One-line outcome string for audit records, e.g. `"21/23 succeeded"`.
    pub fn outcome(&self) -> String {
        format!("{}/{} succeeded", self.succeeded, self.results.len())
    }
}

/// What `execute` returned: either the batch ran, or it is being held by
/// the confirmation gate until the actor relays the affirmative token.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Executed(BatchSummary),
    AwaitingConfirmation {
        operation_id: Uuid,
        /// Human-readable prompt for the host to surface, e.g.
        /// "This will delete 23 file(s). Say 'confirm delete' to proceed."
        prompt: String,
    },
}

impl ExecuteOutcome {
    /// Unwraps the summary, for call sites that know the gate was bypassed.
    pub fn summary(self) -> Option<BatchSummary> {
        match self {
            Self::Executed(summary) => Some(summary),
            Self::AwaitingConfirmation { .. } => None,
        }
    }
}
