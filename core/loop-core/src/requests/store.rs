//! File-backed request records (split pending/completed layout).
//!
//! The producer writes `pending/<id>.json`; the response writer writes
//! `completed/<id>.json`. Neither side mutates the other's file, and the core
//! never deletes a record unless asked to explicitly.
//!
//! # Defensive Design
//!
//! Other processes write these directories concurrently, so reads tolerate:
//! - missing directories (empty listing)
//! - corrupt or half-migrated JSON (record skipped, warning logged)
//! - records in a legacy shape (see [`super::record`])
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a poller never observes a partial record.

use fs_err as fs;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::record::parse_request;
use crate::error::{LoopError, Result};
use crate::storage::{validate_request_id, StorageConfig, TEMP_FILE_PREFIX};
use crate::types::Request;

#[derive(Debug, Clone)]
pub struct RequestStore {
    storage: StorageConfig,
}

impl RequestStore {
    pub fn new(storage: StorageConfig) -> Self {
        RequestStore { storage }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// All parseable pending records, oldest first (`createdAt`, then id).
    pub fn list_pending(&self) -> Vec<Request> {
        let dir = self.storage.pending_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "Failed to list pending requests");
                return Vec::new();
            }
        };

        let mut requests: Vec<Request> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| read_record(&path))
            .collect();

        requests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        requests
    }

    pub fn read_pending(&self, request_id: &str) -> Option<Request> {
        validate_request_id(request_id).ok()?;
        read_record(&self.storage.pending_file(request_id))
    }

    pub fn read_completed(&self, request_id: &str) -> Option<Request> {
        validate_request_id(request_id).ok()?;
        read_record(&self.storage.completed_file(request_id))
    }

    pub fn pending_exists(&self, request_id: &str) -> bool {
        self.storage.pending_file(request_id).exists()
    }

    pub fn completed_exists(&self, request_id: &str) -> bool {
        self.storage.completed_file(request_id).exists()
    }

    /// True while the request still exists in either area.
    pub fn exists(&self, request_id: &str) -> bool {
        self.pending_exists(request_id) || self.completed_exists(request_id)
    }

    /// True once a request no longer needs a prompt: its pending record is
    /// gone, it has a completed record, or its status left `pending`.
    pub fn has_left_pending(&self, request_id: &str) -> bool {
        if validate_request_id(request_id).is_err() {
            return true;
        }
        if self.completed_exists(request_id) {
            return true;
        }
        if !self.pending_exists(request_id) {
            return true;
        }
        // An unreadable pending file is not treated as answered.
        self.read_pending(request_id)
            .is_some_and(|request| !request.is_pending())
    }

    pub fn write_pending(&self, request: &Request) -> Result<()> {
        validate_request_id(&request.id)?;
        self.storage.ensure(&self.storage.pending_dir())?;
        write_json_atomic(&self.storage.pending_file(&request.id), request)
    }

    pub fn write_completed(&self, request: &Request) -> Result<()> {
        validate_request_id(&request.id)?;
        self.storage.ensure(&self.storage.completed_dir())?;
        write_json_atomic(&self.storage.completed_file(&request.id), request)
    }

    /// Deletes the pending and completed records. Absent files are fine.
    pub fn remove(&self, request_id: &str) -> Result<()> {
        validate_request_id(request_id)?;
        remove_if_exists(&self.storage.pending_file(request_id))?;
        remove_if_exists(&self.storage.completed_file(request_id))?;
        Ok(())
    }
}

fn read_record(path: &Path) -> Option<Request> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(error = %err, "Failed to read request record");
            return None;
        }
    };

    if content.trim().is_empty() {
        debug!(path = %path.display(), "Skipping empty request record");
        return None;
    }

    match parse_request(&content) {
        Ok(request) => Some(request),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Skipping malformed request record");
            None
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LoopError::io("Failed to remove request record", err)),
    }
}

/// Serializes `value` to a sibling temp file and renames it over `path`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| LoopError::json("Failed to serialize record", e))?;

    let parent_dir = path.parent().ok_or_else(|| {
        LoopError::io(
            "Record path has no parent directory",
            std::io::Error::from(ErrorKind::InvalidInput),
        )
    })?;
    let mut temp_file = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(parent_dir)
        .map_err(|e| LoopError::io("Failed to create temp file", e))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| LoopError::io("Failed to write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| LoopError::io("Failed to flush temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| LoopError::io(format!("Failed to persist {}", path.display()), e.error))?;
    Ok(())
}
