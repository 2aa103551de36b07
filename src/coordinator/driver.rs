//! Event-stream driver
//!
//! Adapts a stream of parser events to the coordinator entry points. A
//! stream that ends without [`ParserEvent::Finish`] means the connection
//! closed early, and the request is abandoned.

use super::record::PartMeta;
use super::session::{Completion, PartBody, RequestCoordinator};
use crate::config::UploadConfig;
use crate::report::UploadSummary;
use crate::storage::UploadSink;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Event produced by the multipart parser
pub enum ParserEvent {
    /// A file field with its body
    Part { meta: PartMeta, body: PartBody },
    /// No more parts will be announced
    Finish,
}

impl ParserEvent {
    pub fn part<S>(meta: PartMeta, body: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Part {
            meta,
            body: Box::pin(body),
        }
    }
}

impl fmt::Debug for ParserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Part { meta, .. } => f.debug_struct("Part").field("meta", meta).finish(),
            Self::Finish => f.write_str("Finish"),
        }
    }
}

/// Feed `events` into `coordinator` and wait for the result.
///
/// Returns `None` when the event stream ends before `Finish` (the request is
/// abandoned and its files removed).
pub async fn run_request<E>(
    coordinator: &RequestCoordinator,
    completion: Completion,
    events: E,
) -> Option<UploadSummary>
where
    E: Stream<Item = ParserEvent>,
{
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        match event {
            ParserEvent::Part { meta, body } => {
                if let Err(e) = coordinator.on_part(meta, body) {
                    tracing::warn!(
                        request_id = %coordinator.request_id(),
                        error = %e,
                        "part event ignored"
                    );
                }
            }
            ParserEvent::Finish => match coordinator.on_end() {
                Ok(()) => return completion.await,
                Err(e) => {
                    tracing::warn!(
                        request_id = %coordinator.request_id(),
                        error = %e,
                        "finish event ignored"
                    );
                }
            },
        }
    }

    coordinator.abandon().await;
    None
}

/// Validate `config`, then process one request from its parser events.
///
/// A configuration error is returned before any event is consumed; otherwise
/// the outcome is the summary, or `None` for an abandoned request.
pub async fn handle_upload<E>(
    config: UploadConfig,
    sink: Arc<dyn UploadSink>,
    events: E,
) -> crate::Result<Option<UploadSummary>>
where
    E: Stream<Item = ParserEvent>,
{
    let (coordinator, completion) = RequestCoordinator::new(config, sink)?;
    Ok(run_request(&coordinator, completion, events).await)
}
