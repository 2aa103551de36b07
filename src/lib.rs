//! Upflow Core - streaming multipart upload coordination
//!
//! Takes the file parts of one multipart request as they arrive, validates
//! each against the caller's policy (count, MIME allow-list, size, custom
//! filter), persists the accepted ones and reports a single aggregated
//! result once every part is settled.

pub mod config;
pub mod coordinator;
pub mod report;
pub mod storage;
pub mod stream;
pub mod telemetry;
pub mod validation;

pub use config::{UploadConfig, UploadOptions, WriteMode};
pub use coordinator::{
    handle_upload, run_request, Completion, ParserEvent, PartMeta, PartRecord, PartStatus,
    RequestCoordinator,
};
pub use report::{FileReport, UploadStats, UploadSummary};
pub use storage::{DiskSink, UploadSink};
pub use validation::ReasonCode;

use thiserror::Error;

/// Main error type for upload operations
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] coordinator::CoordinatorError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_handle_upload_without_parts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = UploadConfig::builder(temp_dir.path()).build().unwrap();

        let summary = handle_upload(
            config,
            Arc::new(DiskSink::new()),
            stream::iter(vec![ParserEvent::Finish]),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.stats, UploadStats::default());
        assert!(summary.files.is_empty());
    }

    #[tokio::test]
    async fn test_config_error_surfaces_before_events() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("uploads");
        std::fs::create_dir(&path).unwrap();
        let config = UploadConfig::builder(path.clone()).build().unwrap();

        // the directory is replaced by a file before the request arrives
        std::fs::remove_dir(&path).unwrap();
        std::fs::write(&path, b"not a directory").unwrap();

        let result = handle_upload(
            config,
            Arc::new(DiskSink::new()),
            stream::iter(vec![ParserEvent::Finish]),
        )
        .await;

        assert!(matches!(
            result,
            Err(UploadError::Config(config::ConfigError::UploadPathNotDirectory(_)))
        ));
    }
}
