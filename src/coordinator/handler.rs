//! Per-part task: read, validate, write
//!
//! Each part body is consumed by one task that owns its byte counter and
//! buffer. The task never touches request state directly; every change is a
//! transition applied through [`Shared::update`].

use super::record::PartId;
use super::request::WriteOutcome;
use super::session::{PartBody, Shared};
use crate::config::{DebugEvent, WriteMode};
use crate::storage::naming::fallback_name;
use crate::storage::{Destination, SinkWriter};
use crate::stream::{ByteCounter, PartBuffer};
use crate::validation::{PartValidator, ReasonCode, ValidationOutcome};

use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

type Body = ByteCounter<PartBody>;

/// Run `fut` unless the request is abandoned first
async fn until_cancelled<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.wait_for(|cancelled| *cancelled) => None,
        output = fut => Some(output),
    }
}

pub(crate) async fn drive_part(shared: Arc<Shared>, id: PartId, body: PartBody) {
    let mut cancel = shared.cancellation();
    let Some(record) = shared.part(id) else {
        return;
    };

    let Some(name) = until_cancelled(
        &mut cancel,
        shared.config.resolve_upload_name(&record.meta),
    )
    .await
    else {
        return;
    };
    let request_id = shared.request_id();
    let destination = Destination::resolve(
        shared.config.upload_path(),
        name,
        &record.meta.filename,
        || fallback_name(request_id, id),
    );
    let Some(destination) = shared.update(|request| request.claim_destination(id, destination))
    else {
        return;
    };

    let shared: &Shared = &shared;
    let mut part = PartTask {
        shared,
        validator: PartValidator::new(&shared.config),
        cancel,
        id,
        field: record.meta.field_name,
        destination,
    };
    let mut body = ByteCounter::new(body);

    // Count and MIME problems are known before the first byte
    let Some(record) = part.shared.part(id) else {
        return;
    };
    if part.validator.check_static(&record, 0).is_rejected() {
        part.reject(0, None).await;
        part.drain(&mut body).await;
        return;
    }

    match part.shared.config.write_mode() {
        WriteMode::Buffered => part.read_buffered(body).await,
        WriteMode::Streaming => part.read_streaming(body).await,
    }
}

struct PartTask<'a> {
    shared: &'a Shared,
    validator: PartValidator<'a>,
    cancel: watch::Receiver<bool>,
    id: PartId,
    field: String,
    destination: Destination,
}

impl PartTask<'_> {
    /// Buffer the whole part, validate, then write it in one go
    async fn read_buffered(&mut self, mut body: Body) {
        let mut buffer = PartBuffer::new();

        loop {
            let Some(next) = until_cancelled(&mut self.cancel, body.next()).await else {
                return;
            };
            match next {
                Some(Ok(chunk)) => {
                    buffer.push(chunk);
                    let size = body.total();
                    self.progress(size);

                    if body.exceeds(self.shared.config.max_size()) {
                        let released = buffer.discard();
                        tracing::debug!(part = self.id, released, "oversized part discarded");
                        self.reject(size, None).await;
                        self.drain(&mut body).await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    buffer.discard();
                    self.stream_failed(body.total(), &e, None).await;
                    return;
                }
                None => break,
            }
        }
        self.closed(&body);

        let size = body.total();
        let Some(outcome) = self.final_outcome(size).await else {
            return;
        };
        if outcome.is_rejected() {
            buffer.discard();
            self.settle_rejection(outcome.into_reasons(), size);
            return;
        }

        let Some(contents) = buffer.take() else {
            return;
        };
        if !self.shared.update(|request| request.begin_write(self.id)) {
            return;
        }

        let path = self.destination.path.as_path();
        let result = self.shared.sink.write(path, contents).await;
        let outcome = match result {
            Ok(written) => WriteOutcome::Written {
                size: written,
                checksum: body.digest().to_hex(),
            },
            Err(e) => {
                tracing::warn!(part = self.id, path = %path.display(), error = %e, "part write failed");
                self.remove_partial(path).await;
                WriteOutcome::Failed
            }
        };
        self.shared
            .update(|request| request.complete_write(self.id, outcome));
    }

    /// Write chunks as they arrive; delete the partial file on late rejection
    async fn read_streaming(&mut self, mut body: Body) {
        if !self.shared.update(|request| request.open_write(self.id)) {
            return;
        }
        let path = self.destination.path.clone();

        let mut writer: Box<dyn SinkWriter> = match self.shared.sink.open(&path).await {
            Ok(writer) => writer,
            Err(e) => {
                tracing::warn!(part = self.id, path = %path.display(), error = %e, "sink open failed");
                self.write_failed(&path).await;
                self.drain(&mut body).await;
                return;
            }
        };

        loop {
            let Some(next) = until_cancelled(&mut self.cancel, body.next()).await else {
                // abandon() removes the partial file once this task is done
                return;
            };
            match next {
                Some(Ok(chunk)) => {
                    let size = body.total();
                    self.progress(size);

                    if body.exceeds(self.shared.config.max_size()) {
                        drop(writer);
                        self.reject(size, Some(path.as_path())).await;
                        self.drain(&mut body).await;
                        return;
                    }
                    if let Err(e) = writer.write_chunk(&chunk).await {
                        tracing::warn!(part = self.id, path = %path.display(), error = %e, "chunk write failed");
                        drop(writer);
                        self.write_failed(&path).await;
                        self.drain(&mut body).await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    drop(writer);
                    self.stream_failed(body.total(), &e, Some(path.as_path())).await;
                    return;
                }
                None => break,
            }
        }
        self.closed(&body);

        let size = body.total();
        let Some(outcome) = self.final_outcome(size).await else {
            return;
        };
        if outcome.is_rejected() {
            drop(writer);
            self.remove_partial(&path).await;
            self.settle_rejection(outcome.into_reasons(), size);
            return;
        }

        if !self.shared.update(|request| request.begin_write(self.id)) {
            return;
        }
        let outcome = match writer.finish().await {
            Ok(written) => WriteOutcome::Written {
                size: written,
                checksum: body.digest().to_hex(),
            },
            Err(e) => {
                tracing::warn!(part = self.id, path = %path.display(), error = %e, "part flush failed");
                drop(writer);
                self.remove_partial(&path).await;
                WriteOutcome::Failed
            }
        };
        self.shared
            .update(|request| request.complete_write(self.id, outcome));
    }

    fn progress(&self, size: u64) {
        self.shared
            .update(|request| request.record_progress(self.id, size));
    }

    fn closed(&self, body: &Body) {
        tracing::debug!(
            part = self.id,
            size_bytes = body.total(),
            chunks = body.chunks(),
            "part body read"
        );
        self.shared.config.emit_debug(DebugEvent::StreamClosed {
            part: self.id,
            field: self.field.clone(),
        });
    }

    /// Run the full evaluation (custom filter included) at stream end
    async fn final_outcome(&mut self, size: u64) -> Option<ValidationOutcome> {
        let record = self.shared.part(self.id)?;
        until_cancelled(&mut self.cancel, self.validator.evaluate(&record, size)).await
    }

    /// Early rejection: evaluate everything so all reasons surface, remove
    /// any partial file, then settle the record
    async fn reject(&mut self, size: u64, partial: Option<&Path>) {
        let Some(outcome) = self.final_outcome(size).await else {
            return;
        };
        if let Some(path) = partial {
            self.remove_partial(path).await;
        }
        self.settle_rejection(outcome.into_reasons(), size);
    }

    fn settle_rejection(&self, reasons: Vec<ReasonCode>, size: u64) {
        self.shared
            .update(|request| request.reject(self.id, reasons, size));
    }

    async fn stream_failed(&mut self, size: u64, error: &std::io::Error, partial: Option<&Path>) {
        tracing::warn!(part = self.id, error = %error, "part stream failed");
        if let Some(path) = partial {
            self.remove_partial(path).await;
        }
        self.settle_rejection(vec![ReasonCode::StreamError], size);
    }

    async fn write_failed(&self, path: &Path) {
        self.remove_partial(path).await;
        self.shared
            .update(|request| request.complete_write(self.id, WriteOutcome::Failed));
    }

    async fn remove_partial(&self, path: &Path) {
        if let Err(e) = self.shared.sink.remove(path).await {
            self.shared.config.emit_debug(DebugEvent::CleanupFailed {
                path: path.to_path_buf(),
                error: e.to_string(),
            });
        }
    }

    /// Read and throw away the rest of a rejected part so the parser can move on
    async fn drain(&mut self, body: &mut Body) {
        let before = body.total();
        while let Some(Some(Ok(_))) = until_cancelled(&mut self.cancel, body.next()).await {}
        self.shared.config.emit_debug(DebugEvent::StreamDiscarded {
            part: self.id,
            bytes: body.total() - before,
        });
    }
}
