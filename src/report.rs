//! Result aggregation
//!
//! Folds the settled part records of a request into the summary handed to
//! the terminal callback. Only metadata and outcome survive; buffers and
//! handles never reach the report.

use crate::coordinator::{PartRecord, PartStatus};
use crate::validation::ReasonCode;
use crate::UploadError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Request-level counters. `total == success + error` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total: usize,
    pub success: usize,
    pub error: usize,
}

/// The part as the client sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalFile {
    pub name: String,
    pub field: String,
    pub encoding: String,
    pub mime: String,
    pub size: u64,
}

/// Where and how the part was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub uploaded_name: Option<String>,
    pub uploaded_path: Option<PathBuf>,
    pub upload_duration_ms: u64,
    pub checksum: Option<String>,
}

/// Outcome for one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub success: bool,
    pub status: PartStatus,
    pub errors: Vec<ReasonCode>,
    pub original_file: OriginalFile,
    pub uploaded_file: UploadedFile,
}

/// Aggregated result of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stats: UploadStats,
    pub files: Vec<FileReport>,
    pub duration_ms: u64,
}

impl UploadSummary {
    /// Parts that were written
    pub fn successful(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.success)
    }

    /// Parts that were rejected or failed to write
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.success)
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, UploadError> {
        serde_json::to_string_pretty(self).map_err(|e| UploadError::Serialization(e.to_string()))
    }
}

/// Pure data shaping over part records
pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the summary from records in arrival order
    pub fn aggregate<'a>(
        request_id: Uuid,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        records: impl IntoIterator<Item = &'a PartRecord>,
    ) -> UploadSummary {
        let files: Vec<FileReport> = records.into_iter().map(Self::report).collect();

        let success = files.iter().filter(|f| f.success).count();
        let stats = UploadStats {
            total: files.len(),
            success,
            error: files.len() - success,
        };

        UploadSummary {
            request_id,
            started_at,
            stats,
            files,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Report for a single record
    pub fn report(record: &PartRecord) -> FileReport {
        FileReport {
            success: record.status == PartStatus::Written,
            status: record.status,
            errors: record.errors.clone(),
            original_file: OriginalFile {
                name: record.meta.filename.clone(),
                field: record.meta.field_name.clone(),
                encoding: record.meta.encoding.clone(),
                mime: record.meta.mime_type.clone(),
                size: record.size,
            },
            uploaded_file: UploadedFile {
                uploaded_name: record.uploaded_name.clone(),
                uploaded_path: record.destination.clone(),
                upload_duration_ms: record.duration_ms.unwrap_or_default(),
                checksum: record.checksum.clone(),
            },
        }
    }
}
