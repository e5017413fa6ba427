//! Engine configuration.
//!
//! The engine is embedded in a host process (the intent-translation layer),
//! so configuration arrives as an explicit struct rather than a config file.
//! Everything is rooted at a single data directory; the trash, snapshot and
//! audit areas live underneath it so a same-filesystem rename into trash is
//! possible in the common case.

use chrono::Duration;
use std::path::{Path, PathBuf};

/// Configuration for [`Engine::open`](crate::engine::Engine::open).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for all engine-owned state (trash, snapshots, audit logs).
    pub data_dir: PathBuf,

    /// How long snapshots (and trashed payloads) are kept before they are
    /// permanently purged.
    pub snapshot_retention: Duration,

    /// How long a pending confirmation waits for its token before it
    /// expires and the held batch is discarded.
    pub confirmation_ttl: Duration,

    /// Batches larger than this require explicit confirmation even for
    /// non-destructive kinds.
    pub confirm_file_count: usize,

    /// Hard cap on items per batch; larger requests are rejected outright.
    pub max_batch_size: usize,

    /// Additional path prefixes the host wants denied, on top of the
    /// built-in platform list.
    pub extra_protected_prefixes: Vec<PathBuf>,

    /// Additional forbidden file-name patterns (regular expressions matched
    /// against the final path component).
    pub forbidden_name_patterns: Vec<String>,
}

impl EngineConfig {
    /// Default retention window for snapshots: 24 hours.
    pub const DEFAULT_RETENTION_HOURS: i64 = 24;

    /// Default confirmation window: 2 minutes.
    pub const DEFAULT_CONFIRMATION_SECS: i64 = 120;

    /// Default bulk threshold above which confirmation is required.
    pub const DEFAULT_CONFIRM_FILE_COUNT: usize = 10;

    /// Default maximum items per batch.
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

    /// Creates a configuration with default policy rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            snapshot_retention: Duration::hours(Self::DEFAULT_RETENTION_HOURS),
            confirmation_ttl: Duration::seconds(Self::DEFAULT_CONFIRMATION_SECS),
            confirm_file_count: Self::DEFAULT_CONFIRM_FILE_COUNT,
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            extra_protected_prefixes: Vec::new(),
            forbidden_name_patterns: Vec::new(),
        }
    }

    /// Trash area for DELETE payloads.
    pub fn trash_dir(&self) -> PathBuf {
        self.data_dir.join("trash")
    }

    /// Durable snapshot storage, one JSON file per operation.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Append-only audit log directory, one JSONL file per UTC date.
    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }

    /// Adds a host-specific protected prefix.
    pub fn protect_prefix(mut self, prefix: impl AsRef<Path>) -> Self {
        self.extra_protected_prefixes
            .push(prefix.as_ref().to_path_buf());
        self
    }

    /// Adds a forbidden file-name pattern.
    pub fn forbid_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.forbidden_name_patterns.push(pattern.into());
        self
    }
}
