//! File-backed claims under `<root>/requests/locks/`.
//!
//! # Publishing a lock
//!
//! A lock is written completely into a temp file in the locks directory and
//! then linked into place without clobbering. The link either fails with
//! `AlreadyExists` or publishes the full record at once, so no reader ever
//! sees an empty or half-written lock.
//!
//! # Reclaiming a stale lock
//!
//! Deleting a stale lock and recreating it is two steps. Two listeners that
//! both judged the same lock stale could otherwise interleave so that the
//! slower one deletes the lock the faster one just created. Reclaims (and
//! sweep deletions) therefore run under a reclaim guard, `<lock>.reclaim`,
//! which is itself create-exclusive; under the guard the lock is read and
//! judged again before it is removed. Losing the guard is a claim failure for
//! this tick.

use chrono::{DateTime, Duration, Utc};
use fs_err as fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::record::{is_older_than, Holder, LockRecord};
use super::{ClaimKey, Lock, SweepStats};
use crate::storage::{
    validate_request_id, StorageConfig, LOCK_EXTENSION, OWNER_LOCK_PREFIX, REQUEST_LOCK_PREFIX,
    TEMP_FILE_PREFIX,
};

const RECLAIM_SUFFIX: &str = "reclaim";
/// Guards live for microseconds; anything this old was abandoned.
const RECLAIM_GUARD_MAX_AGE_SECS: i64 = 60;
/// Temp files are renamed away within one write; older ones were left by a crash.
const TEMP_FILE_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(60);

/// What is currently at a lock path.
enum LockState {
    Missing,
    Unreadable,
    Held(LockRecord, Option<DateTime<Utc>>),
}

pub struct FileLockManager {
    storage: StorageConfig,
    holder: Holder,
    max_age: Duration,
}

impl FileLockManager {
    pub fn new(storage: StorageConfig, max_age: Duration) -> Self {
        Self::with_holder(storage, Holder::current(), max_age)
    }

    pub fn with_holder(storage: StorageConfig, holder: Holder, max_age: Duration) -> Self {
        FileLockManager {
            storage,
            holder,
            max_age,
        }
    }

    pub fn holder(&self) -> &Holder {
        &self.holder
    }

    /// Attempts to become the only dispatcher of `request_id`. Never blocks.
    pub fn try_claim_request(&self, request_id: &str) -> bool {
        if validate_request_id(request_id).is_err() {
            warn!(request_id, "Refusing to claim invalid request id");
            return false;
        }
        let path = self.storage.request_lock_file(request_id);
        self.try_claim(&path, None, false)
    }

    /// Best-effort release; a missing lock is not an error.
    pub fn release_claim(&self, request_id: &str) {
        if validate_request_id(request_id).is_err() {
            return;
        }
        remove_lock_file(&self.storage.request_lock_file(request_id));
    }

    /// Like [`Self::try_claim_request`], but re-entrant for this holder.
    pub fn try_claim_owner(&self, owner_key: &str) -> bool {
        if owner_key.is_empty() {
            return false;
        }
        let path = self.storage.owner_lock_file(owner_key);
        self.try_claim(&path, Some(owner_key), true)
    }

    /// Releases the owner lock only if this holder still holds it.
    pub fn release_owner_claim(&self, owner_key: &str) {
        let path = self.storage.owner_lock_file(owner_key);
        if self.is_held_by_me(&path) {
            remove_lock_file(&path);
        }
    }

    pub fn is_request_lock_stale(&self, request_id: &str) -> bool {
        self.is_path_stale(&self.storage.request_lock_file(request_id))
    }

    pub fn is_owner_lock_stale(&self, owner_key: &str) -> bool {
        self.is_path_stale(&self.storage.owner_lock_file(owner_key))
    }

    /// Removes locks whose request no longer exists, stale locks, unparseable
    /// owner locks and abandoned reclaim guards, plus temp files left behind
    /// in the record and lock directories. Per-file failures are recorded and
    /// never abort the sweep.
    pub fn sweep_stale(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        for dir in [self.storage.pending_dir(), self.storage.completed_dir()] {
            sweep_temp_files(&dir, &mut stats);
        }

        let locks_dir = self.storage.locks_dir();
        let entries = match fs::read_dir(&locks_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return stats,
            Err(err) => {
                stats.errors.push(format!("Failed to list locks: {}", err));
                return stats;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            if file_name.starts_with(TEMP_FILE_PREFIX) {
                if is_abandoned_temp_file(&path) && remove_for_sweep(&path, &mut stats) {
                    stats.temp_files_removed += 1;
                }
                continue;
            }

            if path.extension().is_some_and(|ext| ext == RECLAIM_SUFFIX) {
                if self.is_guard_abandoned(&path) && remove_for_sweep(&path, &mut stats) {
                    stats.reclaim_guards_removed += 1;
                }
                continue;
            }

            let Some(stem) = file_name.strip_suffix(&format!(".{}", LOCK_EXTENSION)) else {
                continue;
            };

            if let Some(request_id) = stem.strip_prefix(REQUEST_LOCK_PREFIX) {
                if self.sweep_request_lock(&path, request_id, &mut stats) {
                    stats.request_locks_removed += 1;
                }
            } else if let Some(encoded) = stem.strip_prefix(OWNER_LOCK_PREFIX) {
                if self.sweep_owner_lock(&path, encoded, &mut stats) {
                    stats.owner_locks_removed += 1;
                }
            } else if self.sweep_request_lock(&path, stem, &mut stats) {
                // Unprefixed `<id>.lock` from older listeners.
                stats.legacy_locks_removed += 1;
            }
        }

        if stats.total_removed() > 0 || !stats.errors.is_empty() {
            debug!(
                request_locks = stats.request_locks_removed,
                owner_locks = stats.owner_locks_removed,
                legacy_locks = stats.legacy_locks_removed,
                guards = stats.reclaim_guards_removed,
                temp_files = stats.temp_files_removed,
                errors = stats.errors.len(),
                "Lock sweep finished"
            );
        }
        stats
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Claim algorithm
    // ─────────────────────────────────────────────────────────────────────────────

    fn try_claim(&self, path: &Path, owner_key: Option<&str>, reentrant: bool) -> bool {
        if let Err(err) = self.storage.ensure(&self.storage.locks_dir()) {
            warn!(error = %err, "Failed to create locks directory");
            return false;
        }

        let record = self.holder.record(owner_key, Utc::now());
        match self.publish(path, &record) {
            Ok(()) => return true,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to create lock");
                return false;
            }
        }

        if reentrant && self.is_held_by_me(path) {
            return true;
        }

        if !self.is_path_stale(path) {
            debug!(path = %path.display(), "Lock held by another listener");
            return false;
        }

        let Some(_guard) = self.acquire_reclaim_guard(path) else {
            return false;
        };

        // Judge again: another listener may have reclaimed it already.
        match self.inspect(path) {
            LockState::Missing => {}
            LockState::Unreadable => {
                if !remove_lock_file(path) {
                    return false;
                }
            }
            LockState::Held(existing, modified) => {
                if reentrant && self.holder.owns(&existing) {
                    return true;
                }
                if !existing.is_stale(Utc::now(), self.max_age, modified) {
                    return false;
                }
                if !remove_lock_file(path) {
                    return false;
                }
            }
        }

        debug!(path = %path.display(), "Reclaiming stale lock");
        let record = self.holder.record(owner_key, Utc::now());
        match self.publish(path, &record) {
            Ok(()) => true,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Lost stale lock re-creation race");
                false
            }
        }
    }

    /// Create-exclusive write of a complete lock record.
    fn publish(&self, path: &Path, record: &LockRecord) -> std::io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::from(ErrorKind::InvalidInput))?;
        let content = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;

        let mut temp_file = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(parent)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist_noclobber(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn inspect(&self, path: &Path) -> LockState {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return LockState::Missing,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Failed to read lock");
                return LockState::Unreadable;
            }
        };
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        match serde_json::from_str::<LockRecord>(&content) {
            Ok(record) => LockState::Held(record, modified),
            Err(_) => LockState::Unreadable,
        }
    }

    fn is_path_stale(&self, path: &Path) -> bool {
        match self.inspect(path) {
            LockState::Missing => false,
            LockState::Unreadable => true,
            LockState::Held(record, modified) => record.is_stale(Utc::now(), self.max_age, modified),
        }
    }

    fn is_held_by_me(&self, path: &Path) -> bool {
        match self.inspect(path) {
            LockState::Held(record, _) => self.holder.owns(&record),
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reclaim guard
    // ─────────────────────────────────────────────────────────────────────────────

    fn guard_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(RECLAIM_SUFFIX);
        path.with_file_name(name)
    }

    fn acquire_reclaim_guard(&self, lock_path: &Path) -> Option<ReclaimGuard> {
        let guard_path = Self::guard_path(lock_path);
        let record = self.holder.record(None, Utc::now());
        match self.publish(&guard_path, &record) {
            Ok(()) => Some(ReclaimGuard { path: guard_path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if self.is_guard_abandoned(&guard_path) {
                    debug!(path = %guard_path.display(), "Removing abandoned reclaim guard");
                    remove_lock_file(&guard_path);
                }
                None
            }
            Err(err) => {
                warn!(path = %guard_path.display(), error = %err, "Failed to create reclaim guard");
                None
            }
        }
    }

    fn is_guard_abandoned(&self, guard_path: &Path) -> bool {
        let guard_max_age = Duration::seconds(RECLAIM_GUARD_MAX_AGE_SECS);
        match self.inspect(guard_path) {
            LockState::Missing => false,
            LockState::Unreadable => true,
            LockState::Held(record, modified) => {
                if record.is_stale(Utc::now(), guard_max_age, modified) {
                    return true;
                }
                let claimed = record
                    .claimed_at
                    .as_deref()
                    .and_then(crate::requests::record::parse_timestamp)
                    .or(modified);
                claimed.is_some_and(|at| is_older_than(Utc::now(), at, guard_max_age))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sweep helpers
    // ─────────────────────────────────────────────────────────────────────────────

    fn request_exists(&self, request_id: &str) -> bool {
        self.storage.pending_file(request_id).exists()
            || self.storage.completed_file(request_id).exists()
    }

    fn sweep_request_lock(&self, path: &Path, request_id: &str, stats: &mut SweepStats) -> bool {
        if validate_request_id(request_id).is_err() || !self.request_exists(request_id) {
            return remove_for_sweep(path, stats);
        }
        self.sweep_if_stale(path, stats)
    }

    fn sweep_owner_lock(&self, path: &Path, encoded: &str, stats: &mut SweepStats) -> bool {
        let decoded = urlencoding::decode(encoded).ok().filter(|key| !key.is_empty());
        if decoded.is_none() {
            return remove_for_sweep(path, stats);
        }
        self.sweep_if_stale(path, stats)
    }

    fn sweep_if_stale(&self, path: &Path, stats: &mut SweepStats) -> bool {
        if !self.is_path_stale(path) {
            return false;
        }
        let Some(_guard) = self.acquire_reclaim_guard(path) else {
            return false;
        };
        if !self.is_path_stale(path) {
            return false;
        }
        remove_for_sweep(path, stats)
    }
}

impl Lock for FileLockManager {
    fn try_acquire(&self, key: &ClaimKey) -> bool {
        match key {
            ClaimKey::Request(id) => self.try_claim_request(id),
            ClaimKey::Owner(owner_key) => self.try_claim_owner(owner_key),
        }
    }

    fn release(&self, key: &ClaimKey) {
        match key {
            ClaimKey::Request(id) => self.release_claim(id),
            ClaimKey::Owner(owner_key) => self.release_owner_claim(owner_key),
        }
    }

    fn is_stale(&self, key: &ClaimKey) -> bool {
        match key {
            ClaimKey::Request(id) => self.is_request_lock_stale(id),
            ClaimKey::Owner(owner_key) => self.is_owner_lock_stale(owner_key),
        }
    }

    fn sweep_stale(&self) -> SweepStats {
        FileLockManager::sweep_stale(self)
    }
}

/// Removes the guard file when the reclaim finishes, on every path out.
struct ReclaimGuard {
    path: PathBuf,
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Removes crash leftovers from `dir`; records and locks are left alone.
fn sweep_temp_files(dir: &Path, stats: &mut SweepStats) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(err) => {
            stats.errors.push(format!("Failed to list {}: {}", dir.display(), err));
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_FILE_PREFIX));
        if is_temp && is_abandoned_temp_file(&path) && remove_for_sweep(&path, stats) {
            stats.temp_files_removed += 1;
        }
    }
}

fn is_abandoned_temp_file(path: &Path) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > TEMP_FILE_MAX_AGE)
}

/// Returns true if the file is gone afterwards.
fn remove_lock_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to remove lock");
            false
        }
    }
}

/// Returns true only if this call removed the file.
fn remove_for_sweep(path: &Path, stats: &mut SweepStats) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            stats
                .errors
                .push(format!("Failed to remove {}: {}", path.display(), err));
            false
        }
    }
}
