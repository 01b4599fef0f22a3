//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::mux::SessionSnapshot;
use crate::upload::UploadOutcome;

/// Generic API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "UPLOAD_FAILED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::new("UPLOAD_FAILED", message)
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    /// Session summaries.
    pub sessions: Vec<SessionSummary>,
}

/// Brief session summary for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub connection_id: String,
    pub remote_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    pub local_terminal: String,
    pub idle_seconds: f64,
    /// Seconds since the connection opened.
    pub age_seconds: f64,
}

impl SessionSummary {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            connection_id: snapshot.id.to_string(),
            remote_state: snapshot.remote_state.as_str().to_string(),
            remote_host: snapshot
                .target
                .as_ref()
                .map(|t| format!("{}@{}:{}", t.username, t.host, t.port)),
            local_terminal: snapshot.local_state.as_str().to_string(),
            idle_seconds: snapshot.idle.as_secs_f64(),
            age_seconds: snapshot.age.as_secs_f64(),
        }
    }
}

/// Response for a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub remote_path: String,
    pub bytes: u64,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            message: "File uploaded successfully".to_string(),
            remote_path: outcome.remote_path,
            bytes: outcome.bytes,
        }
    }
}
