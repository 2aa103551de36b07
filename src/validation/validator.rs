//! Part validator
//!
//! Evaluates count, MIME, size and custom-filter checks for one part. Every
//! check runs, so a rejected part carries all the reasons that apply.

use super::{ReasonCode, ValidationOutcome};
use crate::config::{Deny, UploadConfig};
use crate::coordinator::{PartId, PartRecord};

/// Stateless policy evaluator bound to one request's configuration
#[derive(Debug, Clone, Copy)]
pub struct PartValidator<'a> {
    config: &'a UploadConfig,
}

impl<'a> PartValidator<'a> {
    pub fn new(config: &'a UploadConfig) -> Self {
        Self { config }
    }

    /// Whether the part with this 1-based index is past the count limit
    pub fn count_exceeded(&self, part_index: PartId) -> bool {
        self.config
            .max_amount()
            .is_some_and(|max| part_index > max)
    }

    /// Whether the MIME type passes the allow-list (an empty list allows all).
    /// Parameters such as `; charset=` are ignored and case does not matter.
    pub fn mime_allowed(&self, mime_type: &str) -> bool {
        let allowed = self.config.mime_types();
        if allowed.is_empty() {
            return true;
        }
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        allowed.iter().any(|m| m.eq_ignore_ascii_case(essence))
    }

    /// Whether the running size is over the per-file limit
    pub fn size_exceeded(&self, running_size: u64) -> bool {
        self.config.max_size().is_some_and(|max| running_size > max)
    }

    /// Count, MIME and size checks. Never calls hooks.
    pub fn check_static(&self, record: &PartRecord, running_size: u64) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::accepted();

        if self.count_exceeded(record.id) {
            outcome.push(ReasonCode::MaxFileAmountReached);
        }
        if !self.mime_allowed(&record.meta.mime_type) {
            outcome.push(ReasonCode::FileTypeNotAllowed);
        }
        if self.size_exceeded(running_size) {
            outcome.push(ReasonCode::UploadedFileTooBig);
        }

        outcome
    }

    /// Full evaluation: static checks followed by the custom filter.
    ///
    /// The filter may suspend; the coordinator calls this once per part, at
    /// the point where the part's fate is decided.
    pub async fn evaluate(&self, record: &PartRecord, running_size: u64) -> ValidationOutcome {
        let mut outcome = self.check_static(record, running_size);

        if let Some(filter) = self.config.filter() {
            let mut deny = Deny::default();
            filter.check(record, &mut deny).await;
            for reason in deny.into_reasons() {
                outcome.push(ReasonCode::from_code(&reason));
            }
        }

        outcome
    }
}
