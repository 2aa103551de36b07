//! Part records - the lifecycle of one file field

use crate::storage::Destination;
use crate::validation::ReasonCode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// 1-based, per-request part index
pub type PartId = u64;

/// What the multipart parser tells us about a file field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMeta {
    pub field_name: String,
    pub filename: String,
    pub encoding: String,
    pub mime_type: String,
}

impl PartMeta {
    pub fn new(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        encoding: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            encoding: encoding.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Fill an empty MIME type from the filename
    pub fn with_guessed_mime(mut self) -> Self {
        if self.mime_type.trim().is_empty() {
            self.mime_type = mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .to_string();
        }
        self
    }
}

/// Part lifecycle. `Rejected`, `Written` and `WriteFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartStatus {
    Reading,
    Rejected,
    Writing,
    Written,
    WriteFailed,
}

impl PartStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Written | Self::WriteFailed)
    }
}

/// One file field's record inside a request
#[derive(Debug, Clone, Serialize)]
pub struct PartRecord {
    pub id: PartId,
    pub meta: PartMeta,
    pub uploaded_name: Option<String>,
    pub destination: Option<PathBuf>,
    /// Bytes received before the part was decided
    pub size: u64,
    /// BLAKE3 hex digest of the persisted bytes
    pub checksum: Option<String>,
    /// Reason codes; empty while the part is still valid
    pub errors: Vec<ReasonCode>,
    pub status: PartStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,

    #[serde(skip)]
    started: Instant,
    /// Storage was (or may have been) written for this part
    #[serde(skip)]
    pub(crate) touched_storage: bool,
    /// Counted in the request's pending-write total
    #[serde(skip)]
    pub(crate) holds_write: bool,
}

impl PartRecord {
    pub fn new(id: PartId, meta: PartMeta) -> Self {
        Self {
            id,
            meta,
            uploaded_name: None,
            destination: None,
            size: 0,
            checksum: None,
            errors: Vec::new(),
            status: PartStatus::Reading,
            started_at: Utc::now(),
            duration_ms: None,
            started: Instant::now(),
            touched_storage: false,
            holds_write: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No reason codes recorded so far
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn assign(&mut self, destination: &Destination) {
        self.uploaded_name = Some(destination.uploaded_name.clone());
        self.destination = Some(destination.path.clone());
    }

    /// Move to a terminal status. Returns `false` if already terminal.
    pub(crate) fn settle(&mut self, status: PartStatus, reasons: Vec<ReasonCode>) -> bool {
        debug_assert!(status.is_terminal());
        if self.is_terminal() {
            return false;
        }
        for reason in reasons {
            if !self.errors.contains(&reason) {
                self.errors.push(reason);
            }
        }
        self.status = status;
        self.duration_ms = Some(self.started.elapsed().as_millis() as u64);
        true
    }
}
