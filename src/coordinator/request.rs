//! Per-request state
//!
//! `UploadRequest` is owned by the coordinator and only changed through the
//! transition methods below, each called under the request lock. The
//! terminal check runs after every transition in the same critical section.

use super::record::{PartId, PartMeta, PartRecord, PartStatus};
use super::CoordinatorError;
use crate::report::{ResultAggregator, UploadSummary};
use crate::storage::Destination;
use crate::validation::ReasonCode;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Where the aggregated result goes
pub(crate) enum Terminal {
    Channel(oneshot::Sender<UploadSummary>),
    Callback(Box<dyn FnOnce(UploadSummary) + Send>),
}

impl Terminal {
    pub(crate) fn deliver(self, summary: UploadSummary) {
        match self {
            // The receiver may be gone if the caller stopped waiting
            Self::Channel(tx) => {
                let _ = tx.send(summary);
            }
            Self::Callback(callback) => callback(summary),
        }
    }
}

/// Result of a storage write as seen by the state machine
pub(crate) enum WriteOutcome {
    Written { size: u64, checksum: String },
    Failed,
}

/// State of one incoming upload request
pub struct UploadRequest {
    id: Uuid,
    part_counter: PartId,
    parts: BTreeMap<PartId, PartRecord>,
    started_at: DateTime<Utc>,
    started: Instant,
    parts_ended: bool,
    finished: bool,
    abandoned: bool,
    pending_writes: usize,
    terminal: Option<Terminal>,
}

impl UploadRequest {
    pub(crate) fn new(terminal: Terminal) -> Self {
        Self {
            id: Uuid::new_v4(),
            part_counter: 0,
            parts: BTreeMap::new(),
            started_at: Utc::now(),
            started: Instant::now(),
            parts_ended: false,
            finished: false,
            abandoned: false,
            pending_writes: 0,
            terminal: Some(terminal),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Accepted parts whose write has not completed yet
    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    pub fn parts_ended(&self) -> bool {
        self.parts_ended
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, id: PartId) -> Option<&PartRecord> {
        self.parts.get(&id)
    }

    /// Records in arrival order
    pub fn parts(&self) -> impl Iterator<Item = &PartRecord> {
        self.parts.values()
    }

    fn ensure_open(&self) -> Result<(), CoordinatorError> {
        if self.abandoned || self.finished {
            return Err(CoordinatorError::RequestClosed);
        }
        if self.parts_ended {
            return Err(CoordinatorError::PartsEnded);
        }
        Ok(())
    }

    /// Create the record for a newly announced part
    pub(crate) fn register(&mut self, meta: PartMeta) -> Result<PartId, CoordinatorError> {
        self.ensure_open()?;
        self.part_counter += 1;
        let id = self.part_counter;
        self.parts.insert(id, PartRecord::new(id, meta));
        Ok(id)
    }

    /// The parser announced that no more parts will arrive
    pub(crate) fn mark_parts_ended(&mut self) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        self.parts_ended = true;
        Ok(())
    }

    /// Claim a destination for part `id`. A path already held by another
    /// part of this request gets the part index appended, so every part owns
    /// its own file and cleanup never removes a sibling's.
    pub(crate) fn claim_destination(
        &mut self,
        id: PartId,
        destination: Destination,
    ) -> Option<Destination> {
        if !self.parts.contains_key(&id) {
            return None;
        }

        let mut claimed = destination.clone();
        let mut attempt = 1u64;
        while self.path_claimed(&claimed.path, id) {
            claimed = if attempt == 1 {
                destination.with_suffix(id)
            } else {
                destination.with_suffix(format!("{}-{}", id, attempt))
            };
            attempt += 1;
        }
        if claimed != destination {
            tracing::debug!(
                request_id = %self.id,
                part = id,
                path = %claimed.path.display(),
                "destination taken by a sibling part, renamed"
            );
        }

        let record = self.parts.get_mut(&id)?;
        record.assign(&claimed);
        Some(claimed)
    }

    fn path_claimed(&self, path: &Path, except: PartId) -> bool {
        self.parts
            .values()
            .any(|part| part.id != except && part.destination.as_deref() == Some(path))
    }

    pub(crate) fn record_progress(&mut self, id: PartId, size: u64) {
        if let Some(record) = self.parts.get_mut(&id) {
            if !record.is_terminal() {
                record.size = size;
            }
        }
    }

    /// Streaming mode: a sink is about to be opened while the part is still
    /// being read. Returns `false` if the part or request can no longer write.
    pub(crate) fn open_write(&mut self, id: PartId) -> bool {
        if self.abandoned {
            return false;
        }
        let Some(record) = self.parts.get_mut(&id) else {
            return false;
        };
        if record.is_terminal() || record.holds_write {
            return false;
        }
        record.touched_storage = true;
        record.holds_write = true;
        self.pending_writes += 1;
        true
    }

    /// `reading -> writing`, entering the pending-write set if not already in it
    pub(crate) fn begin_write(&mut self, id: PartId) -> bool {
        if self.abandoned {
            return false;
        }
        let Some(record) = self.parts.get_mut(&id) else {
            return false;
        };
        if record.status != PartStatus::Reading {
            return false;
        }
        record.status = PartStatus::Writing;
        record.touched_storage = true;
        if !record.holds_write {
            record.holds_write = true;
            self.pending_writes += 1;
        }
        true
    }

    /// `reading -> rejected`. Releases a held write (streaming mode).
    pub(crate) fn reject(&mut self, id: PartId, reasons: Vec<ReasonCode>, size: u64) -> bool {
        let Some(record) = self.parts.get_mut(&id) else {
            return false;
        };
        if record.status != PartStatus::Reading {
            return false;
        }
        record.size = size;
        record.settle(PartStatus::Rejected, reasons);
        if std::mem::take(&mut record.holds_write) {
            self.pending_writes -= 1;
        }
        tracing::debug!(
            request_id = %self.id,
            part = id,
            errors = ?record.errors,
            "part rejected"
        );
        true
    }

    /// `writing -> written | write-failed` (streaming failures may come
    /// straight from `reading`)
    pub(crate) fn complete_write(&mut self, id: PartId, outcome: WriteOutcome) -> bool {
        let Some(record) = self.parts.get_mut(&id) else {
            return false;
        };
        if record.is_terminal() || !record.holds_write {
            return false;
        }
        let settled = match outcome {
            WriteOutcome::Written { size, checksum } => {
                record.size = size;
                record.checksum = Some(checksum);
                record.settle(PartStatus::Written, vec![])
            }
            WriteOutcome::Failed => {
                record.settle(PartStatus::WriteFailed, vec![ReasonCode::UnableToUploadFile])
            }
        };
        record.holds_write = false;
        self.pending_writes -= 1;
        settled
    }

    /// Hand out the summary if every part is settled, the parser is done and
    /// nothing was delivered yet. Never yields twice.
    pub(crate) fn take_completion(&mut self) -> Option<(Terminal, UploadSummary)> {
        if self.finished || self.abandoned || !self.parts_ended || self.pending_writes > 0 {
            return None;
        }
        if self.parts.values().any(|part| !part.is_terminal()) {
            return None;
        }
        let terminal = self.terminal.take()?;
        self.finished = true;

        let summary = ResultAggregator::aggregate(
            self.id,
            self.started_at,
            self.started.elapsed(),
            self.parts.values(),
        );
        Some((terminal, summary))
    }

    /// Give up on the request: no result will ever be delivered
    pub(crate) fn abandon(&mut self) -> bool {
        if self.finished || self.abandoned {
            return false;
        }
        self.abandoned = true;
        // Dropping the sender resolves a waiting `Completion` to `None`
        self.terminal = None;
        true
    }

    /// Paths this request may have written to
    pub(crate) fn touched_paths(&self) -> Vec<PathBuf> {
        self.parts
            .values()
            .filter(|part| part.touched_storage)
            .filter_map(|part| part.destination.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> (UploadRequest, oneshot::Receiver<UploadSummary>) {
        let (tx, rx) = oneshot::channel();
        (UploadRequest::new(Terminal::Channel(tx)), rx)
    }

    fn meta(name: &str) -> PartMeta {
        PartMeta::new("file", name, "7bit", "text/plain")
    }

    fn named(name: &str, filename: &str) -> Destination {
        Destination::resolve(Path::new("up"), Some(name.into()), filename, String::new)
    }

    fn written(size: u64) -> WriteOutcome {
        WriteOutcome::Written {
            size,
            checksum: "00".into(),
        }
    }

    #[test]
    fn test_zero_parts_completes_on_end() {
        let (mut request, _rx) = request();
        assert!(request.take_completion().is_none());

        request.mark_parts_ended().unwrap();
        let (_, summary) = request.take_completion().unwrap();

        assert_eq!(summary.stats.total, 0);
        assert!(summary.files.is_empty());
        assert!(request.take_completion().is_none());
    }

    #[test]
    fn test_write_finishing_after_end() {
        let (mut request, _rx) = request();
        let id = request.register(meta("a.txt")).unwrap();
        assert!(request.begin_write(id));
        assert_eq!(request.pending_writes(), 1);

        request.mark_parts_ended().unwrap();
        assert!(request.take_completion().is_none());

        assert!(request.complete_write(id, written(3)));
        assert_eq!(request.pending_writes(), 0);
        let (_, summary) = request.take_completion().unwrap();
        assert_eq!(summary.stats.success, 1);
        assert!(request.take_completion().is_none());
    }

    #[test]
    fn test_write_finishing_before_end() {
        let (mut request, _rx) = request();
        let id = request.register(meta("a.txt")).unwrap();
        request.begin_write(id);
        request.complete_write(id, written(3));
        assert!(request.take_completion().is_none());

        request.mark_parts_ended().unwrap();
        assert!(request.take_completion().is_some());
    }

    #[test]
    fn test_reading_part_blocks_completion() {
        let (mut request, _rx) = request();
        let id = request.register(meta("a.txt")).unwrap();
        request.mark_parts_ended().unwrap();

        assert_eq!(request.pending_writes(), 0);
        assert!(request.take_completion().is_none());

        request.reject(id, vec![ReasonCode::StreamError], 0);
        let (_, summary) = request.take_completion().unwrap();
        assert_eq!(summary.stats.error, 1);
    }

    #[test]
    fn test_streaming_rejection_releases_pending_write() {
        let (mut request, _rx) = request();
        let id = request.register(meta("a.txt")).unwrap();

        assert!(request.open_write(id));
        assert!(!request.open_write(id));
        assert_eq!(request.pending_writes(), 1);

        assert!(request.reject(id, vec![ReasonCode::UploadedFileTooBig], 10));
        assert_eq!(request.pending_writes(), 0);
        // terminal states never move again
        assert!(!request.begin_write(id));
        assert!(!request.complete_write(id, written(10)));
        assert_eq!(request.part(id).unwrap().status, PartStatus::Rejected);
    }

    #[test]
    fn test_write_failure_counts_as_error() {
        let (mut request, _rx) = request();
        let id = request.register(meta("a.txt")).unwrap();
        request.begin_write(id);
        request.complete_write(id, WriteOutcome::Failed);
        request.mark_parts_ended().unwrap();

        let (_, summary) = request.take_completion().unwrap();
        assert_eq!(summary.stats.error, 1);
        assert_eq!(summary.stats.success, 0);
        assert_eq!(
            request.part(id).unwrap().errors,
            vec![ReasonCode::UnableToUploadFile]
        );
    }

    #[test]
    fn test_events_after_end_are_refused() {
        let (mut request, _rx) = request();
        request.mark_parts_ended().unwrap();

        assert!(matches!(
            request.register(meta("late.txt")),
            Err(CoordinatorError::PartsEnded)
        ));
        assert!(matches!(
            request.mark_parts_ended(),
            Err(CoordinatorError::PartsEnded)
        ));

        request.take_completion();
        assert!(matches!(
            request.register(meta("later.txt")),
            Err(CoordinatorError::RequestClosed)
        ));
    }

    #[test]
    fn test_abandon_drops_terminal_and_lists_touched_paths() {
        let (mut request, mut rx) = request();
        let a = request.register(meta("a.txt")).unwrap();
        let b = request.register(meta("b.txt")).unwrap();
        request.claim_destination(a, named("a", "a.txt"));
        request.claim_destination(b, named("b", "b.txt"));
        request.begin_write(a);

        assert!(request.abandon());
        assert!(!request.abandon());
        assert!(!request.begin_write(b));

        assert_eq!(request.touched_paths(), vec![PathBuf::from("up/a.txt")]);
        request.mark_parts_ended().ok();
        request.complete_write(a, written(1));
        assert!(request.take_completion().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_destination_is_renamed() {
        let (mut request, _rx) = request();
        let a = request.register(meta("one.txt")).unwrap();
        let b = request.register(meta("two.txt")).unwrap();
        let c = request.register(meta("three.txt")).unwrap();

        let first = request.claim_destination(a, named("same", "one.txt")).unwrap();
        let second = request.claim_destination(b, named("same", "two.txt")).unwrap();
        // a name that already looks like a renamed sibling
        let third = request.claim_destination(c, named("same-2", "three.txt")).unwrap();

        assert_eq!(first.path, PathBuf::from("up/same.txt"));
        assert_eq!(second.path, PathBuf::from("up/same-2.txt"));
        assert_eq!(second.uploaded_name, "same-2");
        assert_eq!(third.path, PathBuf::from("up/same-2-3.txt"));
        assert_eq!(
            request.part(b).unwrap().destination.as_deref(),
            Some(Path::new("up/same-2.txt"))
        );

        // claiming again for the same part keeps its own path
        let again = request.claim_destination(a, named("same", "one.txt")).unwrap();
        assert_eq!(again.path, first.path);
        assert!(request.claim_destination(99, named("x", "x.txt")).is_none());
    }
}
