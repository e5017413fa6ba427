//! Recoverable trash area for DELETE operations.
//!
//! Files are never unlinked by a batch. DELETE relocates the target into a
//! per-operation directory under the trash root, from which rollback can
//! move it back. Payloads become unrecoverable only when the snapshot store
//! purges the expired operation.
//!
//! The common case is a same-filesystem rename; when the target lives on a
//! different device the move falls back to copy+remove.

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;

/// Manages the trash directory layout and the moves in and out of it.
pub struct TrashArea {
    root: PathBuf,
}

impl TrashArea {
    /// Opens (and creates, if needed) the trash area at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the payload for one item of one operation lands.
    ///
    /// Layout: `<root>/<operation_id>/<item_index>_<file_name>`. The index
    /// prefix keeps same-named files from separate directories apart.
    pub fn slot(&self, operation_id: Uuid, item_index: usize, original: &Path) -> PathBuf {
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.root
            .join(operation_id.to_string())
            .join(format!("{item_index}_{file_name}"))
    }

    /// Moves `original` into the trash, returning the trash path.
    pub fn trash(&self, operation_id: Uuid, item_index: usize, original: &Path) -> Result<PathBuf> {
        let slot = self.slot(operation_id, item_index, original);
        if let Some(parent) = slot.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(original, &slot)?;
        log::debug!("Trashed: {} → {}", original.display(), slot.display());
        Ok(slot)
    }

    /// Moves a trashed payload back to its original location.
    pub fn restore(&self, trash_path: &Path, original: &Path) -> Result<()> {
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(trash_path, original)?;
        log::debug!("Restored: {} → {}", trash_path.display(), original.display());
        Ok(())
    }

    /// Permanently removes an operation's entire payload directory.
    ///
    /// Called by the snapshot store when the operation expires. This is the
    /// only place trashed data is destroyed.
    pub fn purge_operation(&self, operation_id: Uuid) -> Result<()> {
        let dir = self.root.join(operation_id.to_string());
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            log::info!("Purged trash payload for operation {operation_id}");
        }
        Ok(())
    }
}

/// Moves a file or directory, preferring an atomic rename.
///
/// Falls back to copy+remove when source and destination are on different
/// filesystems. If the copy half fails partway, the half-written
/// destination is removed before the error surfaces; the source is only
/// removed once the copy completed.
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    if is_same_filesystem(from, to)? {
        fs::rename(from, to)?;
        return Ok(());
    }

    if from.is_dir() {
        if let Err(e) = copy_dir_recursive(from, to) {
            remove_partial(to);
            return Err(e);
        }
        fs::remove_dir_all(from)?;
    } else {
        if let Err(e) = fs::copy(from, to) {
            remove_partial(to);
            return Err(e.into());
        }
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Removes whatever a failed copy left at `dest`. Nothing tracks that
/// debris once the copy is reported failed, so it must not stay on disk.
pub fn remove_partial(dest: &Path) {
    let outcome = if dest.is_dir() {
        fs::remove_dir_all(dest)
    } else if dest.exists() {
        fs::remove_file(dest)
    } else {
        Ok(())
    };
    if let Err(e) = outcome {
        log::warn!("Could not remove partial copy {}: {e}", dest.display());
    }
}

/// Checks if paths are on the same filesystem.
///
/// Determines if atomic `rename()` is possible, or if cross-filesystem
/// copy+remove is required.
fn is_same_filesystem(path1: &Path, path2: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta1 = fs::metadata(path1)?;
        let meta2_parent = path2.parent().unwrap_or(path2);
        let meta2 = fs::metadata(meta2_parent)?;
        Ok(meta1.dev() == meta2.dev())
    }

    #[cfg(not(unix))]
    {
        let path1_str = path1.to_string_lossy();
        let path2_str = path2.to_string_lossy();

        if path1_str.len() >= 2 && path2_str.len() >= 2 {
            Ok(path1_str.chars().next() == path2_str.chars().next())
        } else {
            Ok(true)
        }
    }
}

/// Recursively copies a directory tree.
pub fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from_path = entry.path();
        let to_path = to.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&from_path, &to_path)?;
        } else {
            fs::copy(&from_path, &to_path)?;
        }
    }

    Ok(())
}
