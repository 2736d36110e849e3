//! Lock file contents and staleness rules.
//!
//! ```json
//! { "pid": 4242, "holder": "01J...", "ownerKey": "session:abc",
//!   "claimedAt": "2025-03-01T10:20:30Z", "procStarted": 1740824000 }
//! ```
//!
//! `holder` and `procStarted` are absent in locks written by older listeners;
//! those are identified by PID alone.
//!
//! # Staleness
//!
//! 1. PID present and checkable: stale iff the holder is dead (or its PID was
//!    recycled, detected via `procStarted`).
//! 2. Otherwise: stale iff older than the age threshold, measured from
//!    `claimedAt`, else from the file's mtime. No reference time at all is
//!    treated as stale. Negative ages (clock jumped back) are never stale.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::liveness::{check_holder, process_start_time};
use crate::requests::record::parse_timestamp;

/// Identity written into every lock this instance creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub pid: u32,
    /// Distinguishes several listeners inside one OS process.
    pub token: String,
    pub proc_started: Option<u64>,
}

impl Holder {
    /// A fresh identity for the current process.
    pub fn current() -> Self {
        let pid = std::process::id();
        Holder {
            pid,
            token: ulid::Ulid::new().to_string(),
            proc_started: process_start_time(pid),
        }
    }

    pub(crate) fn record(&self, owner_key: Option<&str>, now: DateTime<Utc>) -> LockRecord {
        LockRecord {
            pid: Some(self.pid),
            holder: Some(self.token.clone()),
            owner_key: owner_key.map(str::to_string),
            claimed_at: Some(now.to_rfc3339()),
            proc_started: self.proc_started,
        }
    }

    /// Whether `record` was written by this holder. Legacy records without a
    /// token match on PID alone.
    pub fn owns(&self, record: &LockRecord) -> bool {
        if record.pid != Some(self.pid) {
            return false;
        }
        match &record.holder {
            Some(token) => *token == self.token,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proc_started: Option<u64>,
}

impl LockRecord {
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
        modified: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(pid) = self.pid {
            if let Some(alive) = check_holder(pid, self.proc_started) {
                return !alive;
            }
        }

        let reference = self
            .claimed_at
            .as_deref()
            .and_then(parse_timestamp)
            .or(modified);
        match reference {
            Some(at) => is_older_than(now, at, max_age),
            None => true,
        }
    }
}

/// `now - at > max_age`, with negative elapsed time treated as fresh.
pub fn is_older_than(now: DateTime<Utc>, at: DateTime<Utc>, max_age: Duration) -> bool {
    let age = now.signed_duration_since(at);
    age > Duration::zero() && age > max_age
}
