//! Request coordinator - entry points for parser events

use super::handler;
use super::record::{PartId, PartMeta, PartRecord};
use super::request::{Terminal, UploadRequest};
use super::CoordinatorError;
use crate::config::{ConfigError, DebugEvent, UploadConfig};
use crate::report::UploadSummary;
use crate::storage::{DiskSink, UploadSink};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Body of one part as delivered by the parser
pub type PartBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// State shared between the coordinator and its part tasks
pub(crate) struct Shared {
    pub(crate) config: UploadConfig,
    pub(crate) sink: Arc<dyn UploadSink>,
    request: Mutex<UploadRequest>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel_tx: watch::Sender<bool>,
}

impl Shared {
    /// Apply one transition, then deliver the result if it just became due.
    /// Delivery happens after the lock is released.
    pub(crate) fn update<R>(&self, transition: impl FnOnce(&mut UploadRequest) -> R) -> R {
        let (result, completion) = {
            let mut request = self.request.lock();
            let result = transition(&mut request);
            (result, request.take_completion())
        };

        if let Some((terminal, summary)) = completion {
            tracing::info!(
                request_id = %summary.request_id,
                total = summary.stats.total,
                success = summary.stats.success,
                error = summary.stats.error,
                duration_ms = summary.duration_ms,
                "upload request completed"
            );
            terminal.deliver(summary);
        }

        result
    }

    pub(crate) fn read<R>(&self, view: impl FnOnce(&UploadRequest) -> R) -> R {
        view(&self.request.lock())
    }

    pub(crate) fn part(&self, id: PartId) -> Option<PartRecord> {
        self.read(|request| request.part(id).cloned())
    }

    pub(crate) fn request_id(&self) -> Uuid {
        self.read(|request| request.id())
    }

    pub(crate) fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }
}

/// Resolves to the request summary, or `None` if the request was abandoned
pub struct Completion {
    rx: oneshot::Receiver<UploadSummary>,
}

impl Future for Completion {
    type Output = Option<UploadSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

/// Coordinates all parts of one upload request.
///
/// Must be used inside a Tokio runtime; every part body is driven by a
/// spawned task.
pub struct RequestCoordinator {
    shared: Arc<Shared>,
}

impl RequestCoordinator {
    /// Create a coordinator; the returned [`Completion`] yields the summary
    pub fn new(
        config: UploadConfig,
        sink: Arc<dyn UploadSink>,
    ) -> Result<(Self, Completion), ConfigError> {
        let (tx, rx) = oneshot::channel();
        let coordinator = Self::build(config, sink, Terminal::Channel(tx))?;
        Ok((coordinator, Completion { rx }))
    }

    /// Create a coordinator writing to the local filesystem
    pub fn on_disk(config: UploadConfig) -> Result<(Self, Completion), ConfigError> {
        Self::new(config, Arc::new(DiskSink::new()))
    }

    /// Create a coordinator that calls `callback` once with the summary
    pub fn with_callback<F>(
        config: UploadConfig,
        sink: Arc<dyn UploadSink>,
        callback: F,
    ) -> Result<Self, ConfigError>
    where
        F: FnOnce(UploadSummary) + Send + 'static,
    {
        Self::build(config, sink, Terminal::Callback(Box::new(callback)))
    }

    fn build(
        config: UploadConfig,
        sink: Arc<dyn UploadSink>,
        terminal: Terminal,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let request = UploadRequest::new(terminal);
        tracing::debug!(
            request_id = %request.id(),
            upload_path = %config.upload_path().display(),
            write_mode = ?config.write_mode(),
            "upload request opened"
        );

        let (cancel_tx, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                sink,
                request: Mutex::new(request),
                tasks: Mutex::new(Vec::new()),
                cancel_tx,
            }),
        })
    }

    pub fn request_id(&self) -> Uuid {
        self.shared.request_id()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    /// A new file part was announced by the parser
    pub fn on_part<S>(&self, meta: PartMeta, body: S) -> Result<PartId, CoordinatorError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let meta = meta.with_guessed_mime();
        let field = meta.field_name.clone();

        let id = self.shared.update(|request| request.register(meta))?;
        tracing::debug!(
            request_id = %self.request_id(),
            part = id,
            field = %field,
            "part announced"
        );

        let task = tokio::spawn(handler::drive_part(self.shared.clone(), id, Box::pin(body)));

        let mut tasks = self.shared.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);

        Ok(id)
    }

    /// The parser will announce no more parts
    pub fn on_end(&self) -> Result<(), CoordinatorError> {
        self.shared.update(|request| request.mark_parts_ended())
    }

    /// Cloned records in arrival order
    pub fn snapshot(&self) -> Vec<PartRecord> {
        self.shared.read(|request| request.parts().cloned().collect())
    }

    pub fn pending_writes(&self) -> usize {
        self.shared.read(|request| request.pending_writes())
    }

    pub fn is_finished(&self) -> bool {
        self.shared.read(|request| request.is_finished())
    }

    pub fn is_abandoned(&self) -> bool {
        self.shared.read(|request| request.is_abandoned())
    }

    /// The connection went away before the request completed.
    ///
    /// Stops every part task, waits for in-flight writes to return, then
    /// removes every file the request touched. No result is delivered.
    /// Returns how many touched paths were cleaned up; a finished request is
    /// left alone.
    pub async fn abandon(&self) -> usize {
        if !self.shared.update(|request| request.abandon()) {
            return 0;
        }
        let request_id = self.request_id();
        tracing::warn!(request_id = %request_id, "upload request abandoned");

        self.shared.cancel_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(request_id = %request_id, error = %e, "part task ended abnormally");
            }
        }

        let mut removed = 0;
        for path in self.shared.read(|request| request.touched_paths()) {
            match self.shared.sink.remove(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
                    self.shared.config.emit_debug(DebugEvent::CleanupFailed {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        removed
    }
}
