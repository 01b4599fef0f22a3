//! File upload: local staging plus transfer to a remote host.
//!
//! An upload is first written to a [`StagingArea`], then handed to the
//! [`UploadDispatcher`], which opens its own remote connection, streams the
//! file through the connection's file-transfer channel and cleans up.

mod dispatcher;
mod staging;

pub use dispatcher::{remote_file_path, UploadDispatcher, UploadOutcome, UploadRequest};
pub use staging::{sanitize_file_name, StagedFile, StagingArea};
