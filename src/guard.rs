//! Protected-path validation.
//!
//! Every path in every batch item, source and destination alike, must pass
//! this guard before the item is scheduled. Denial is policy, not an I/O
//! condition: there is no override flag, and the engine's own data
//! directories are always on the list so a batch can never eat the trash
//! area or the audit trail.

use regex::RegexSet;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Built-in file and directory names that are never valid targets,
/// regardless of location. Credentials, VCS metadata, dependency caches.
const FORBIDDEN_NAMES: &[&str] = &[
    ".env",
    ".env.local",
    ".env.production",
    "id_rsa",
    "id_ed25519",
    "credentials",
    ".git",
    ".svn",
    "node_modules",
    "__pycache__",
];

/// Validates batch targets against the protected deny-list.
pub struct ProtectedPathGuard {
    prefixes: Vec<PathBuf>,
    name_patterns: RegexSet,
}

impl ProtectedPathGuard {
    /// Builds the guard from built-in platform prefixes, the engine's own
    /// data directories, and the host's extensions.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut prefixes = Self::platform_prefixes();

        // The engine must never mutate its own state through a batch.
        prefixes.push(config.data_dir.clone());
        prefixes.extend(config.extra_protected_prefixes.iter().cloned());

        let name_patterns = RegexSet::new(&config.forbidden_name_patterns)
            .map_err(|e| EngineError::Validation(format!("bad deny-list pattern: {e}")))?;

        Ok(Self {
            prefixes,
            name_patterns,
        })
    }

    #[cfg(unix)]
    fn platform_prefixes() -> Vec<PathBuf> {
        let mut prefixes: Vec<PathBuf> = [
            "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/etc", "/var", "/boot", "/proc", "/sys",
            "/dev", "/System", "/Library", "/private",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        if let Some(home) = std::env::var_os("HOME") {
            let home = PathBuf::from(home);
            prefixes.push(home.join(".ssh"));
            prefixes.push(home.join(".aws"));
            prefixes.push(home.join(".config"));
        }

        prefixes
    }

    #[cfg(not(unix))]
    fn platform_prefixes() -> Vec<PathBuf> {
        let mut prefixes: Vec<PathBuf> = [
            "C:\\Windows",
            "C:\\Program Files",
            "C:\\Program Files (x86)",
            "C:\\ProgramData",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        if let Some(profile) = std::env::var_os("USERPROFILE") {
            prefixes.push(PathBuf::from(profile).join("AppData"));
        }

        prefixes
    }

    /// Checks a single path. `Err(EngineError::ProtectedPath)` carries the
    /// reason; the executor converts it into a FAILED item rather than
    /// aborting the batch.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(EngineError::Validation("empty path".to_string()));
        }

        for prefix in &self.prefixes {
            if path.starts_with(prefix) {
                return Err(EngineError::ProtectedPath {
                    path: path.to_path_buf(),
                    reason: format!("under protected prefix {}", prefix.display()),
                });
            }
        }

        // Check every component, not just the leaf: moving a directory that
        // *contains* .git would still relocate VCS metadata.
        for component in path.components() {
            let name = component.as_os_str().to_string_lossy();

            if FORBIDDEN_NAMES.contains(&name.as_ref()) {
                return Err(EngineError::ProtectedPath {
                    path: path.to_path_buf(),
                    reason: format!("'{name}' is a protected name"),
                });
            }

            if self.name_patterns.is_match(&name) {
                return Err(EngineError::ProtectedPath {
                    path: path.to_path_buf(),
                    reason: format!("'{name}' matches a forbidden pattern"),
                });
            }
        }

        log::debug!("Path allowed: {}", path.display());
        Ok(())
    }
}
