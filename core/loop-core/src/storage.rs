//! Storage configuration and path management for the feedback loop.
//!
//! `StorageConfig` is the directory store: every path the protocol touches is
//! derived here, and nothing else in the crate joins path segments by hand.
//!
//! ## Layout
//!
//! ```text
//! <root>/config.toml
//! <root>/logs/
//! <root>/requests/pending/<id>.json
//! <root>/requests/completed/<id>.json
//! <root>/requests/images/<id>/image_<millis>.<ext>
//! <root>/requests/locks/request-<id>.lock
//! <root>/requests/locks/owner-<urlencoded-owner-key>.lock
//! ```
//!
//! The root is chosen once at startup: either the per-user home location
//! (`~/.feedback-loop`) or a hidden directory inside a project.

use fs_err as fs;
use std::path::{Path, PathBuf};

use crate::error::{LoopError, Result};

/// Directory name used for both the home and the per-project root.
pub const ROOT_DIR_NAME: &str = ".feedback-loop";

/// Environment variable that overrides the storage root.
pub const ROOT_ENV: &str = "FEEDBACK_LOOP_ROOT";

pub const REQUEST_LOCK_PREFIX: &str = "request-";
pub const OWNER_LOCK_PREFIX: &str = "owner-";
pub const LOCK_EXTENSION: &str = "lock";
/// Records and locks are staged under this prefix before being linked into place.
pub const TEMP_FILE_PREFIX: &str = ".tmp";

/// Where the root directory lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageScope {
    /// `~/.feedback-loop`
    Home,
    /// `<project>/.feedback-loop`
    Project(PathBuf),
}

/// Central configuration for all feedback-loop storage paths.
///
/// Production code resolves a root via [`StorageConfig::resolve`]; tests use
/// [`StorageConfig::with_root`] with a temp directory.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root for a scope, honoring the `FEEDBACK_LOOP_ROOT` override.
    pub fn resolve(scope: &StorageScope) -> Result<Self> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        match scope {
            StorageScope::Home => {
                let home = dirs::home_dir().ok_or(LoopError::HomeDirNotFound)?;
                Ok(Self::with_root(home.join(ROOT_DIR_NAME)))
            }
            StorageScope::Project(project) => Ok(Self::with_root(project.join(ROOT_DIR_NAME))),
        }
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (runtime tuning).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.root.join("requests")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.requests_dir().join("pending")
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.requests_dir().join("completed")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.requests_dir().join("images")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.requests_dir().join("locks")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Per-Request Paths
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to a request's pending record.
    /// Example: <root>/requests/pending/01HX....json
    pub fn pending_file(&self, request_id: &str) -> PathBuf {
        self.pending_dir().join(format!("{}.json", request_id))
    }

    /// Path to a request's completed record.
    pub fn completed_file(&self, request_id: &str) -> PathBuf {
        self.completed_dir().join(format!("{}.json", request_id))
    }

    /// Path to a request's image attachment directory.
    pub fn request_images_dir(&self, request_id: &str) -> PathBuf {
        self.images_dir().join(request_id)
    }

    /// Path to the per-request claim.
    pub fn request_lock_file(&self, request_id: &str) -> PathBuf {
        self.locks_dir().join(format!(
            "{}{}.{}",
            REQUEST_LOCK_PREFIX, request_id, LOCK_EXTENSION
        ))
    }

    /// Path to the per-owner claim. Owner keys contain `:` and arbitrary ids,
    /// so they are percent-encoded into the file name.
    pub fn owner_lock_file(&self, owner_key: &str) -> PathBuf {
        self.locks_dir().join(format!(
            "{}{}.{}",
            OWNER_LOCK_PREFIX,
            urlencoding::encode(owner_key),
            LOCK_EXTENSION
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directory Creation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates `dir` (and parents) if absent. Idempotent.
    pub fn ensure(&self, dir: &Path) -> Result<()> {
        match fs::create_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(LoopError::io("Failed to create directory", e)),
        }
    }

    /// Ensures the request subdirectories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        self.ensure(&self.pending_dir())?;
        self.ensure(&self.completed_dir())?;
        self.ensure(&self.images_dir())?;
        self.ensure(&self.locks_dir())?;
        Ok(())
    }
}

/// Rejects ids that cannot be used verbatim as a file name component.
pub fn validate_request_id(request_id: &str) -> Result<()> {
    let invalid = request_id.is_empty()
        || request_id == "."
        || request_id == ".."
        || request_id.contains(['/', '\\', '\0']);
    if invalid {
        Err(LoopError::InvalidRequestId(request_id.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_root_sets_custom_path() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/test-loop"));
        assert_eq!(config.root(), Path::new("/tmp/test-loop"));
    }

    #[test]
    fn test_request_paths() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/loop"));
        assert_eq!(
            config.pending_file("r1"),
            PathBuf::from("/tmp/loop/requests/pending/r1.json")
        );
        assert_eq!(
            config.completed_file("r1"),
            PathBuf::from("/tmp/loop/requests/completed/r1.json")
        );
        assert_eq!(
            config.request_images_dir("r1"),
            PathBuf::from("/tmp/loop/requests/images/r1")
        );
        assert_eq!(
            config.request_lock_file("r1"),
            PathBuf::from("/tmp/loop/requests/locks/request-r1.lock")
        );
    }

    #[test]
    fn test_owner_lock_file_is_percent_encoded() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/loop"));
        assert_eq!(
            config.owner_lock_file("session:abc/def"),
            PathBuf::from("/tmp/loop/requests/locks/owner-session%3Aabc%2Fdef.lock")
        );
    }

    #[test]
    fn test_project_scope_uses_hidden_dir() {
        if std::env::var_os(ROOT_ENV).is_some() {
            return;
        }
        let config =
            StorageConfig::resolve(&StorageScope::Project(PathBuf::from("/work/app"))).unwrap();
        assert_eq!(config.root(), Path::new("/work/app/.feedback-loop"));
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_root(temp.path().join("root"));

        config.ensure_dirs().unwrap();
        config.ensure_dirs().unwrap();

        assert!(config.pending_dir().is_dir());
        assert!(config.completed_dir().is_dir());
        assert!(config.images_dir().is_dir());
        assert!(config.locks_dir().is_dir());
    }

    #[test]
    fn test_ensure_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let config = StorageConfig::with_root(temp.path().to_path_buf());

        assert!(config.ensure(&blocker.join("child")).is_err());
    }

    #[test]
    fn test_validate_request_id() {
        assert!(validate_request_id("01HXABC").is_ok());
        assert!(validate_request_id("abc-123_x.y").is_ok());
        assert!(validate_request_id("").is_err());
        assert!(validate_request_id("..").is_err());
        assert!(validate_request_id("../etc").is_err());
        assert!(validate_request_id("a\\b").is_err());
    }
}
