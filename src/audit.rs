//! Append-only audit log.
//!
//! One JSON object per line, one file per UTC date (`audit_2026-08-23.jsonl`).
//! Each line is self-contained so streaming readers never need cross-line
//! state, and concurrent appenders cannot corrupt each other beyond line
//! granularity. Records are never edited or deleted; the audit trail
//! outlives snapshot expiry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// What happened to an operation (or one of its items).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Requested,
    Confirmed,
    Executed,
    RolledBack,
    Denied,
}

/// One immutable audit entry.
///
/// `item_index` is `None` for batch-level records (request, confirmation,
/// batch summary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub operation_id: Uuid,
    #[serde(default)]
    pub item_index: Option<usize>,
    pub action: AuditAction,
    pub actor: String,
    pub outcome: String,
    pub paths: Vec<PathBuf>,
}

impl AuditRecord {
    pub fn new(
        operation_id: Uuid,
        item_index: Option<usize>,
        action: AuditAction,
        actor: impl Into<String>,
        outcome: impl Into<String>,
        paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation_id,
            item_index,
            action,
            actor: actor.into(),
            outcome: outcome.into(),
            paths,
        }
    }
}

/// Durable, append-only audit log partitioned by UTC date.
pub struct AuditLog {
    dir: PathBuf,
    // Guards the open-append-flush sequence so concurrent batches interleave
    // at line granularity only.
    writer: Mutex<()>,
}

impl AuditLog {
    /// Opens (and creates, if needed) the audit directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writer: Mutex::new(()),
        })
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit_{date}.jsonl"))
    }

    /// Appends one record. Flushes before returning so the line survives a
    /// crash of the host process.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let path = self.file_for(record.timestamp.date_naive());

        let _guard = self.writer.lock().expect("audit writer lock poisoned");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;

        log::debug!(
            "Audit: {:?} op={} item={:?}",
            record.action,
            record.operation_id,
            record.item_index
        );
        Ok(())
    }

    /// Reads back all records for one UTC date, skipping unparseable lines
    /// rather than failing the whole read (a torn final line after a crash
    /// must not make the day's history unreadable).
    pub fn records_for(&self, date: NaiveDate) -> Result<Vec<AuditRecord>> {
        let path = self.file_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for line in BufReader::new(File::open(&path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unparseable audit line in {}: {e}", path.display()),
            }
        }
        Ok(records)
    }

    /// All records touching one operation id, across every date partition.
    pub fn records_for_operation(&self, operation_id: Uuid) -> Result<Vec<AuditRecord>> {
        let mut records = Vec::new();
        for date in self.partition_dates()? {
            records.extend(
                self.records_for(date)?
                    .into_iter()
                    .filter(|r| r.operation_id == operation_id),
            );
        }
        Ok(records)
    }

    fn partition_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(date) = parse_partition_name(&entry.path()) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }
}

fn parse_partition_name(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_prefix("audit_")?.strip_suffix(".jsonl")?;
    date.parse().ok()
}
