//! Storage Module - persisting accepted parts
//!
//! The coordinator talks to storage only through [`UploadSink`]. A sink
//! writes whole buffered parts, or opens an incremental writer when the
//! request runs in streaming mode.

mod disk;
pub mod naming;

pub use disk::{DiskSink, DiskWriter};
pub use naming::Destination;

use crate::stream::BufferedBody;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create file: {0}")]
    Create(String),

    #[error("Failed to write file: {0}")]
    Write(String),

    #[error("Failed to sync file: {0}")]
    Sync(String),

    #[error("Failed to remove file: {0}")]
    Remove(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable destination for accepted parts.
///
/// Every call resolves exactly once and only after the bytes were handed to
/// the storage layer. Sinks never retry.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Create or overwrite `path` with the whole body; returns bytes written
    async fn write(&self, path: &Path, body: BufferedBody) -> Result<u64, StorageError>;

    /// Open an incremental writer at `path` (streaming mode)
    async fn open(&self, path: &Path) -> Result<Box<dyn SinkWriter>, StorageError>;

    /// Remove a file written by this sink. A missing file is not an error.
    async fn remove(&self, path: &Path) -> Result<(), StorageError>;
}

/// Incremental writer returned by [`UploadSink::open`]
#[async_trait]
pub trait SinkWriter: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError>;

    /// Flush to the storage layer; returns total bytes written
    async fn finish(&mut self) -> Result<u64, StorageError>;
}
