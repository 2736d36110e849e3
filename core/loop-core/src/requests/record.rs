//! Lenient on-disk request shape and its normalization into [`Request`].
//!
//! Producers of several generations write into the same directory, so every
//! compatibility fallback lives here:
//!
//! - missing `status` → `pending`
//! - `requestId` accepted in place of `id` (older completed records)
//! - `options: null` → empty list
//! - naive ISO-8601 timestamps (no offset) are read as local time
//! - blank `sessionId`/`agentId` are dropped
//!
//! Past this boundary a [`Request`] always carries a definite status.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::storage::validate_request_id;
use crate::types::{Request, RequestStatus};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request id {0:?}")]
    InvalidId(String),

    #[error("unknown status {0:?}")]
    UnknownStatus(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestRecord {
    #[serde(alias = "requestId")]
    id: String,
    status: Option<String>,
    project: Option<String>,
    summary: Option<String>,
    created_at: Option<String>,
    session_id: Option<String>,
    agent_id: Option<String>,
    model: Option<String>,
    title: Option<String>,
    options: Option<Vec<String>>,
    content: Option<String>,
    images: Option<Vec<String>>,
    timestamp: Option<String>,
}

/// Parses and normalizes one record file's contents.
pub fn parse_request(content: &str) -> Result<Request, RecordError> {
    let record: RequestRecord = serde_json::from_str(content)?;
    normalize(record)
}

fn normalize(record: RequestRecord) -> Result<Request, RecordError> {
    if validate_request_id(&record.id).is_err() {
        return Err(RecordError::InvalidId(record.id));
    }

    let status = match record.status.as_deref() {
        None => RequestStatus::Pending,
        Some(raw) if raw.trim().is_empty() => RequestStatus::Pending,
        Some(raw) => {
            RequestStatus::parse(raw).ok_or_else(|| RecordError::UnknownStatus(raw.to_string()))?
        }
    };

    Ok(Request {
        id: record.id,
        status,
        project: record.project,
        summary: record.summary,
        created_at: record.created_at.as_deref().and_then(parse_timestamp),
        session_id: trimmed(record.session_id),
        agent_id: trimmed(record.agent_id),
        model: record.model,
        title: record.title,
        options: record.options.unwrap_or_default(),
        content: record.content,
        images: record.images.unwrap_or_default(),
        timestamp: record.timestamp.as_deref().and_then(parse_timestamp),
    })
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses RFC 3339, falling back to a naive local timestamp.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_status_is_pending() {
        let request =
            parse_request(r#"{"id":"r1","project":"/proj","summary":"pick a, b, or c"}"#).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.options.is_empty());
    }

    #[test]
    fn test_explicit_status() {
        let request = parse_request(r#"{"id":"r1","status":"cancelled"}"#).unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(matches!(
            parse_request(r#"{"id":"r1","status":"timeout"}"#),
            Err(RecordError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_request_id_alias() {
        let request = parse_request(r#"{"requestId":"r9","content":"ok"}"#).unwrap();
        assert_eq!(request.id, "r9");
        assert_eq!(request.content.as_deref(), Some("ok"));
    }

    #[test]
    fn test_null_fields_from_python_producer() {
        let request = parse_request(
            r#"{"id":"r1","sessionId":null,"model":null,"options":null,
                "createdAt":"2025-03-01T10:20:30.123456"}"#,
        )
        .unwrap();
        assert_eq!(request.session_id, None);
        assert!(request.options.is_empty());
        assert!(request.created_at.is_some());
    }

    #[test]
    fn test_blank_session_id_dropped() {
        let request = parse_request(r#"{"id":"r1","sessionId":"  ","agentId":" a1 "}"#).unwrap();
        assert_eq!(request.session_id, None);
        assert_eq!(request.agent_id.as_deref(), Some("a1"));
        assert_eq!(request.owner_key().as_deref(), Some("agent:a1"));
    }

    #[test]
    fn test_traversal_id_is_rejected() {
        assert!(matches!(
            parse_request(r#"{"id":"../../etc/passwd"}"#),
            Err(RecordError::InvalidId(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(parse_request("{not json"), Err(RecordError::Json(_))));
        assert!(matches!(parse_request(r#"{"summary":"x"}"#), Err(RecordError::Json(_))));
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts = parse_timestamp("2025-03-01T10:20:30Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:20:30+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
