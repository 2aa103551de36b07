//! Caller-supplied hooks: naming, custom filtering and diagnostics

use crate::coordinator::{PartId, PartMeta, PartRecord};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Computes the stored base name for a part.
///
/// Returning `None` makes the coordinator fall back to a millisecond timestamp.
#[async_trait]
pub trait UploadNamer: Send + Sync {
    async fn upload_name(&self, meta: &PartMeta) -> Option<String>;
}

/// Custom accept/reject hook. Calling [`Deny::deny`] rejects the part.
#[async_trait]
pub trait PartFilter: Send + Sync {
    async fn check(&self, part: &PartRecord, deny: &mut Deny);
}

/// Synchronous naming closure
pub struct FnNamer<F>(pub F);

#[async_trait]
impl<F> UploadNamer for FnNamer<F>
where
    F: Fn(&PartMeta) -> Option<String> + Send + Sync,
{
    async fn upload_name(&self, meta: &PartMeta) -> Option<String> {
        (self.0)(meta)
    }
}

/// Synchronous filter closure
pub struct FnFilter<F>(pub F);

#[async_trait]
impl<F> PartFilter for FnFilter<F>
where
    F: Fn(&PartRecord, &mut Deny) + Send + Sync,
{
    async fn check(&self, part: &PartRecord, deny: &mut Deny) {
        (self.0)(part, deny)
    }
}

/// Collects rejection reasons from a filter
#[derive(Debug, Default)]
pub struct Deny {
    reasons: Vec<String>,
}

impl Deny {
    /// Reject the part with the given reason code
    pub fn deny(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub fn is_denied(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn into_reasons(self) -> Vec<String> {
        self.reasons
    }
}

/// Non-fatal internal events reported to the debug hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// A part body reached its end
    StreamClosed { part: PartId, field: String },
    /// The rest of a rejected part body was read and thrown away
    StreamDiscarded { part: PartId, bytes: u64 },
    /// A partial or orphaned file could not be removed
    CleanupFailed { path: PathBuf, error: String },
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamClosed { part, field } => {
                write!(f, "STREAM_CLOSED part={} field={}", part, field)
            }
            Self::StreamDiscarded { part, bytes } => {
                write!(f, "STREAM_DISCARDED part={} bytes={}", part, bytes)
            }
            Self::CleanupFailed { path, error } => {
                write!(f, "CLEANUP_FAILED path={} error={}", path.display(), error)
            }
        }
    }
}

/// Diagnostic sink for [`DebugEvent`]s
pub type DebugHook = Arc<dyn Fn(&DebugEvent) + Send + Sync>;
