//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::types::{ErrorResponse, ListSessionsResponse, SessionSummary, UploadResponse};
use crate::config::{Config, ConfigError, ServerEntry, UploadSection};
use crate::error::RelayError;
use crate::mux::{Multiplexer, MuxSettings};
use crate::pty::{LocalTerminalSpawner, NativePty};
use crate::remote::{RemoteShellConnector, RemoteTarget, SshConnector};
use crate::session::Credential;
use crate::upload::{StagedFile, StagingArea, UploadDispatcher, UploadRequest};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::bad_request(message)),
    )
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::internal_error(message)),
    )
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub mux: Multiplexer,
    pub uploader: Arc<UploadDispatcher>,
    pub staging: StagingArea,
    pub upload: Arc<UploadSection>,
    pub servers: Arc<Vec<ServerEntry>>,
}

impl AppState {
    /// State with SSH and native PTY adapters and default settings.
    pub fn new() -> Self {
        Self::build(
            Arc::new(SshConnector::new()),
            Arc::new(NativePty::new()),
            MuxSettings::default(),
            &Config::default(),
        )
    }

    /// State with SSH and native PTY adapters, configured from `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::with_adapters(
            Arc::new(SshConnector::new()),
            Arc::new(NativePty::new()),
            config,
        )
    }

    /// State with custom adapters.
    pub fn with_adapters(
        connector: Arc<dyn RemoteShellConnector>,
        spawner: Arc<dyn LocalTerminalSpawner>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let settings = config.to_mux_settings()?;
        Ok(Self::build(connector, spawner, settings, config))
    }

    fn build(
        connector: Arc<dyn RemoteShellConnector>,
        spawner: Arc<dyn LocalTerminalSpawner>,
        settings: MuxSettings,
        config: &Config,
    ) -> Self {
        let uploader = UploadDispatcher::new(Arc::clone(&connector), settings.connect_timeout);
        Self {
            mux: Multiplexer::new(connector, spawner, settings),
            uploader: Arc::new(uploader),
            staging: StagingArea::new(config.upload.staging_dir.clone()),
            upload: Arc::new(config.upload.clone()),
            servers: Arc::new(config.servers.clone()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "shell-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List the configured servers.
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerEntry>> {
    Json(state.servers.as_ref().clone())
}

/// List all live sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let snapshots = state
        .mux
        .sessions()
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let sessions: Vec<SessionSummary> = snapshots.iter().map(SessionSummary::from_snapshot).collect();

    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// Text fields of the upload form.
#[derive(Default)]
struct UploadForm {
    host: Option<String>,
    port: Option<String>,
    username: Option<String>,
    password: Option<String>,
    remote_path: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Stream the `file` field to the staging area.
async fn stage_field(
    staging: &StagingArea,
    field: &mut axum::extract::multipart::Field<'_>,
) -> Result<StagedFile, ApiError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let (mut staged, mut file) = staging.create(&file_name).await.map_err(|e| match e {
        RelayError::InvalidUpload(message) => bad_request(message),
        other => internal_error(other.to_string()),
    })?;

    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| internal_error(e.to_string()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    staged.set_len(written);
    Ok(staged)
}

/// Upload a file to a remote host.
///
/// Multipart fields: `file`, `host`, `port` (default 22), `username`,
/// `password` and `remotePath` (default from configuration).
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut form = UploadForm::default();
    let mut staged: Option<StagedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                staged = Some(stage_field(&state.staging, &mut field).await?);
            }
            "host" | "port" | "username" | "password" | "remotePath" | "remote_path" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?;
                match name.as_str() {
                    "host" => form.host = Some(value),
                    "port" => form.port = Some(value),
                    "username" => form.username = Some(value),
                    "password" => form.password = Some(value),
                    _ => form.remote_path = Some(value),
                }
            }
            other => debug!(field = other, "ignoring upload field"),
        }
    }

    let Some(staged) = staged else {
        return Err(bad_request("No file uploaded"));
    };
    let host = non_empty(form.host).ok_or_else(|| bad_request("host is required"))?;
    let username = non_empty(form.username).ok_or_else(|| bad_request("username is required"))?;
    let port = match non_empty(form.port) {
        None => 22,
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| bad_request(format!("invalid port: {}", port)))?,
    };
    let remote_dir =
        non_empty(form.remote_path).unwrap_or_else(|| state.upload.default_remote_dir.clone());

    let request = UploadRequest {
        target: RemoteTarget::new(host, port, username),
        credential: Credential::new(form.password.unwrap_or_default()),
        staged,
        remote_dir,
    };

    match state.uploader.dispatch(request).await {
        Ok(outcome) => Ok(Json(UploadResponse::from(outcome))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::upload_failed(e.to_string())),
        )),
    }
}
