//! Core types shared by the producer, the poller and response surfaces.
//!
//! [`Request`] is the normalized, status-complete record. The lenient wire
//! shape lives in [`crate::requests::record`]; everything past the store
//! boundary works with these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content value that ends the conversation.
pub const END_SENTINEL: &str = "[end]";
/// Content value that cancels the request.
pub const CANCELLED_SENTINEL: &str = "[cancelled]";

/// Fallback prompt when the producer sent no summary.
pub const DEFAULT_REASON: &str = "Feedback requested";

/// Lifecycle of a request. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Ended,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Classifies a response payload: sentinels map to `Ended`/`Cancelled`,
    /// anything else is a normal completion.
    pub fn from_content(content: &str) -> Self {
        match content {
            END_SENTINEL => RequestStatus::Ended,
            CANCELLED_SENTINEL => RequestStatus::Cancelled,
            _ => RequestStatus::Completed,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "completed" => Some(RequestStatus::Completed),
            "ended" => Some(RequestStatus::Ended),
            "cancelled" | "canceled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Ended => "ended",
            RequestStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One human-review checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub images: Vec<String>,
    /// Last write time; wins over `created_at` for freshness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Request {
    /// A bare pending record for `id`, used when nothing is on disk.
    pub fn stub(id: &str) -> Self {
        Request {
            id: id.to_string(),
            status: RequestStatus::Pending,
            project: None,
            summary: None,
            created_at: None,
            session_id: None,
            agent_id: None,
            model: None,
            title: None,
            options: Vec::new(),
            content: None,
            images: Vec::new(),
            timestamp: None,
        }
    }

    /// `session:<id>` if a session is known, else `agent:<id>`, else none.
    pub fn owner_key(&self) -> Option<String> {
        if let Some(session_id) = non_blank(self.session_id.as_deref()) {
            return Some(format!("session:{}", session_id));
        }
        non_blank(self.agent_id.as_deref()).map(|agent_id| format!("agent:{}", agent_id))
    }

    /// Freshest known write time.
    pub fn last_write(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or(self.created_at)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Applies the metadata fields that are present.
    pub fn merge_metadata(&mut self, metadata: &FeedbackMetadata) {
        if let Some(model) = &metadata.model {
            self.model = Some(model.clone());
        }
        if let Some(session_id) = &metadata.session_id {
            self.session_id = Some(session_id.clone());
        }
        if let Some(title) = &metadata.title {
            self.title = Some(title.clone());
        }
        if let Some(agent_id) = &metadata.agent_id {
            self.agent_id = Some(agent_id.clone());
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Handler-facing request: what a presentation surface needs to prompt a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl From<&Request> for AskRequest {
    fn from(request: &Request) -> Self {
        AskRequest {
            kind: "feedback".to_string(),
            request_id: request.id.clone(),
            reason: request
                .summary
                .as_deref()
                .filter(|summary| !summary.trim().is_empty())
                .unwrap_or(DEFAULT_REASON)
                .to_string(),
            context: request.project.clone(),
            options: request.options.clone(),
            model: request.model.clone(),
            session_id: request.session_id.clone(),
            title: request.title.clone(),
            agent_id: request.agent_id.clone(),
        }
    }
}

/// Optional correlation metadata attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// A human's answer as produced by a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackResponse {
    pub content: String,
    pub images: Vec<String>,
    pub metadata: FeedbackMetadata,
}

impl FeedbackResponse {
    pub fn text(content: impl Into<String>) -> Self {
        FeedbackResponse {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// What a producer supplies when publishing a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewRequest {
    pub project: Option<String>,
    pub summary: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub model: Option<String>,
    pub title: Option<String>,
    pub options: Vec<String>,
}
