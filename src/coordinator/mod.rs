//! Coordinator Module - per-request upload state machine
//!
//! The parser feeds `on_part` / `on_end`; each part body is driven by its
//! own task (read, validate, write) and every state change goes through
//! the request lock, where the terminal condition is also checked.

mod driver;
mod handler;
mod record;
mod request;
mod session;

pub use driver::{handle_upload, run_request, ParserEvent};
pub use record::{PartId, PartMeta, PartRecord, PartStatus};
pub use request::UploadRequest;
pub use session::{Completion, PartBody, RequestCoordinator};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Parser already signalled the end of parts")]
    PartsEnded,

    #[error("Request already finished or abandoned")]
    RequestClosed,
}
