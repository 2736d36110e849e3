//! Claims: advisory mutual exclusion between listener processes.
//!
//! Two kinds of claim exist:
//!
//! - **Request claim** (`request-<id>.lock`): at most one listener ever hands
//!   a given request to its handler.
//! - **Owner claim** (`owner-<key>.lock`): one listener handles every request
//!   of a conversation (`session:<id>` or `agent:<id>`), so two editor windows
//!   never prompt for the same chat at once. Re-entrant for its holder.
//!
//! The poller talks to the [`Lock`] trait only; [`FileLockManager`] is the
//! filesystem implementation, where create-exclusive file creation is the
//! sole cross-process synchronization primitive.

mod file;
pub mod liveness;
mod record;

pub use file::FileLockManager;
pub use record::{Holder, LockRecord};

/// What a claim is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimKey {
    Request(String),
    Owner(String),
}

/// A mutual-exclusion backend the poller can be pointed at.
pub trait Lock {
    /// Non-blocking. True if the caller holds the claim afterwards.
    fn try_acquire(&self, key: &ClaimKey) -> bool;

    /// Best-effort. Owner claims are only released by their holder.
    fn release(&self, key: &ClaimKey);

    /// Whether an existing claim may be taken over.
    fn is_stale(&self, key: &ClaimKey) -> bool;

    /// Periodic cleanup; backends without one report nothing.
    fn sweep_stale(&self) -> SweepStats {
        SweepStats::default()
    }
}

/// Results from a lock sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub request_locks_removed: u32,
    pub owner_locks_removed: u32,
    /// Unprefixed `<id>.lock` files.
    pub legacy_locks_removed: u32,
    pub reclaim_guards_removed: u32,
    /// Staged `.tmp*` files older than a minute.
    pub temp_files_removed: u32,
    pub errors: Vec<String>,
}

impl SweepStats {
    pub fn total_removed(&self) -> u32 {
        self.request_locks_removed
            + self.owner_locks_removed
            + self.legacy_locks_removed
            + self.reclaim_guards_removed
            + self.temp_files_removed
    }
}
