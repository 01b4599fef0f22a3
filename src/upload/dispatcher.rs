//! Sends staged files to a remote host over the file-transfer channel.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::StagedFile;
use crate::error::RelayError;
use crate::remote::{RemoteConnection, RemoteShellConnector, RemoteTarget};
use crate::session::Credential;
use crate::Result;

/// Resolve the remote path for `file_name` inside `dir`.
///
/// File-transfer paths are relative to the login directory, so `~` and a
/// leading `~/` are dropped.
pub fn remote_file_path(dir: &str, file_name: &str) -> String {
    let dir = dir.trim();
    let dir = match dir {
        "" | "~" => "",
        _ => dir.strip_prefix("~/").unwrap_or(dir),
    };

    if dir.is_empty() {
        return file_name.to_string();
    }
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        format!("/{}", file_name)
    } else {
        format!("{}/{}", trimmed, file_name)
    }
}

/// One upload to perform.
#[derive(Debug)]
pub struct UploadRequest {
    pub target: RemoteTarget,
    pub credential: Credential,
    pub staged: StagedFile,
    /// Remote directory; the file keeps its original name inside it.
    pub remote_dir: String,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub remote_path: String,
    pub bytes: u64,
}

/// Performs uploads, one connection per upload.
pub struct UploadDispatcher {
    connector: Arc<dyn RemoteShellConnector>,
    connect_timeout: Duration,
}

impl UploadDispatcher {
    pub fn new(connector: Arc<dyn RemoteShellConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// Upload the staged file.
    ///
    /// Whatever the outcome, the connection is closed and the staged file
    /// is deleted exactly once.
    pub async fn dispatch(&self, request: UploadRequest) -> Result<UploadOutcome> {
        let UploadRequest {
            target,
            credential,
            staged,
            remote_dir,
        } = request;

        let remote_path = remote_file_path(&remote_dir, staged.original_name());
        info!(
            host = %target.host,
            port = target.port,
            remote_path = %remote_path,
            "upload started"
        );

        let result = self
            .transfer(&target, credential, staged.path(), &remote_path)
            .await;

        if let Err(e) = staged.discard().await {
            warn!("failed to remove staged file: {}", e);
        }

        match result {
            Ok(bytes) => {
                info!(remote_path = %remote_path, bytes, "upload finished");
                Ok(UploadOutcome { remote_path, bytes })
            }
            Err(e) => {
                warn!(host = %target.host, "upload failed: {}", e);
                Err(e)
            }
        }
    }

    async fn transfer(
        &self,
        target: &RemoteTarget,
        credential: Credential,
        local: &Path,
        remote_path: &str,
    ) -> Result<u64> {
        let mut connection =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(target, credential))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(RelayError::ConnectTimeout(self.connect_timeout)),
            };

        let result = send_file(connection.as_mut(), local, remote_path).await;

        if let Err(e) = connection.close().await {
            debug!("upload connection close failed: {}", e);
        }
        result
    }
}

async fn send_file(
    connection: &mut dyn RemoteConnection,
    local: &Path,
    remote_path: &str,
) -> Result<u64> {
    let mut channel = connection.open_file_channel().await?;

    let result: Result<u64> = async {
        let mut source = tokio::fs::File::open(local).await?;
        let mut sink = channel.create(remote_path).await?;
        let bytes = tokio::io::copy(&mut source, &mut sink)
            .await
            .map_err(|e| RelayError::Transfer(e.to_string()))?;
        sink.shutdown()
            .await
            .map_err(|e| RelayError::Transfer(e.to_string()))?;
        Ok(bytes)
    }
    .await;

    if let Err(e) = channel.close().await {
        debug!("file channel close failed: {}", e);
    }
    result
}
