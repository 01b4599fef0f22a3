//! Local staging of uploaded files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::Result;

/// Reduce a client-supplied file name to its final path component.
///
/// Both `/` and `\` count as separators. Empty, `.` and `..` are rejected.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    match last {
        "" | "." | ".." => Err(RelayError::InvalidUpload(format!(
            "invalid file name: {:?}",
            name
        ))),
        _ => Ok(last.to_string()),
    }
}

/// Directory holding uploads until they are sent on.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if needed.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Create an empty staged file for `original_name`.
    ///
    /// The file on disk gets a unique name; the sanitized original name is
    /// kept for the remote side.
    pub async fn create(&self, original_name: &str) -> Result<(StagedFile, tokio::fs::File)> {
        let original_name = sanitize_file_name(original_name)?;
        self.prepare().await?;

        let path = self.dir.join(format!("{}.part", Uuid::new_v4()));
        let file = tokio::fs::File::create(&path).await?;
        debug!(path = %path.display(), "staged file created");

        Ok((
            StagedFile {
                path,
                original_name,
                len: 0,
                removed: false,
            },
            file,
        ))
    }
}

/// An upload waiting on local disk.
///
/// Removed by [`StagedFile::discard`], or on drop if that never ran.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    original_name: String,
    len: u64,
    removed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: u64) {
        self.len = len;
    }

    /// Delete the file from disk.
    pub async fn discard(mut self) -> Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "staged file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to remove staged file: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_file_name("/abs/path/a.tar.gz").unwrap(), "a.tar.gz");
    }

    #[test]
    fn test_sanitize_rejects_empty_and_dots() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name(".").is_err());
        assert!(sanitize_file_name("a/..").is_err());
    }

    #[tokio::test]
    async fn test_create_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("uploads"));

        let (mut staged, mut file) = staging.create("hello.txt").await.unwrap();
        file.write_all(b"hello").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        staged.set_len(5);

        assert_eq!(staged.original_name(), "hello.txt");
        assert_eq!(staged.len(), 5);
        assert!(staged.path().starts_with(staging.dir()));
        assert!(staged.path().exists());

        let path = staged.path().to_path_buf();
        staged.discard().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());

        let (staged, file) = staging.create("x.bin").await.unwrap();
        drop(file);
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        let result = staging.create("..").await;
        assert!(matches!(result, Err(RelayError::InvalidUpload(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_staged_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        let (a, _) = staging.create("same.txt").await.unwrap();
        let (b, _) = staging.create("same.txt").await.unwrap();
        assert_ne!(a.path(), b.path());
    }
}
