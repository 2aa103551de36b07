//! Validation Module - per-part upload policy
//!
//! Reason codes and the outcome type shared by the validator, the
//! coordinator and the final report.

mod validator;

pub use validator::PartValidator;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Why a part did not end up on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// The part arrived after the per-request count limit was used up
    MaxFileAmountReached,
    /// Declared MIME type is not on the allow-list
    FileTypeNotAllowed,
    /// Running size went over the per-file limit
    UploadedFileTooBig,
    /// The part body failed mid-read
    StreamError,
    /// The storage sink could not persist the part
    UnableToUploadFile,
    /// Reason supplied by a custom filter
    Custom(String),
}

impl ReasonCode {
    /// Wire code for this reason
    pub fn code(&self) -> &str {
        match self {
            Self::MaxFileAmountReached => "MAX_FILE_AMOUNT_REACHED",
            Self::FileTypeNotAllowed => "FILE_TYPE_NOT_ALLOWED",
            Self::UploadedFileTooBig => "UPLOADED_FILE_TOO_BIG",
            Self::StreamError => "STREAM_ERROR",
            Self::UnableToUploadFile => "UNABLE_TO_UPLOAD_FILE",
            Self::Custom(reason) => reason,
        }
    }

    /// Parse a wire code; unknown codes become [`ReasonCode::Custom`]
    pub fn from_code(code: &str) -> Self {
        match code {
            "MAX_FILE_AMOUNT_REACHED" => Self::MaxFileAmountReached,
            "FILE_TYPE_NOT_ALLOWED" => Self::FileTypeNotAllowed,
            "UPLOADED_FILE_TOO_BIG" => Self::UploadedFileTooBig,
            "STREAM_ERROR" => Self::StreamError,
            "UNABLE_TO_UPLOAD_FILE" => Self::UnableToUploadFile,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ReasonCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code))
    }
}

/// Accept/reject decision for one part. Rejected when any reason is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    reasons: Vec<ReasonCode>,
}

impl ValidationOutcome {
    /// An accepting outcome
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Add a reason; duplicates are ignored
    pub fn push(&mut self, reason: ReasonCode) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn is_rejected(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn reasons(&self) -> &[ReasonCode] {
        &self.reasons
    }

    pub fn into_reasons(self) -> Vec<ReasonCode> {
        self.reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_parse_back() {
        for reason in [
            ReasonCode::MaxFileAmountReached,
            ReasonCode::FileTypeNotAllowed,
            ReasonCode::UploadedFileTooBig,
            ReasonCode::StreamError,
            ReasonCode::UnableToUploadFile,
        ] {
            assert_eq!(ReasonCode::from_code(reason.code()), reason);
        }
        assert_eq!(
            ReasonCode::from_code("INVALID_BIT_AMOUNT"),
            ReasonCode::Custom("INVALID_BIT_AMOUNT".into())
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![
            ReasonCode::UploadedFileTooBig,
            ReasonCode::Custom("QUOTA".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"["UPLOADED_FILE_TOO_BIG","QUOTA"]"#);
    }

    #[test]
    fn test_outcome_dedups_reasons() {
        let mut outcome = ValidationOutcome::accepted();
        assert!(outcome.is_accepted());

        outcome.push(ReasonCode::FileTypeNotAllowed);
        outcome.push(ReasonCode::FileTypeNotAllowed);
        outcome.push(ReasonCode::UploadedFileTooBig);

        assert!(outcome.is_rejected());
        assert_eq!(outcome.reasons().len(), 2);
    }
}
