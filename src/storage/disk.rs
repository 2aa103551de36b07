//! Local filesystem sink

use super::{SinkWriter, StorageError, UploadSink};
use crate::stream::BufferedBody;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Writes parts to the local filesystem, syncing before reporting success
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSink;

impl DiskSink {
    pub fn new() -> Self {
        Self
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Create(format!("{}: {}", parent.display(), e)))?;
        }
        Ok(())
    }

    async fn create(path: &Path) -> Result<fs::File, StorageError> {
        Self::ensure_parent_dir(path).await?;
        fs::File::create(path)
            .await
            .map_err(|e| StorageError::Create(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl UploadSink for DiskSink {
    async fn write(&self, path: &Path, body: BufferedBody) -> Result<u64, StorageError> {
        let start = std::time::Instant::now();
        let mut file = Self::create(path).await?;

        for chunk in body.chunks() {
            file.write_all(chunk)
                .await
                .map_err(|e| StorageError::Write(format!("{}: {}", path.display(), e)))?;
        }

        file.flush()
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", path.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::Sync(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = body.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "part written to disk"
        );

        Ok(body.len() as u64)
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn SinkWriter>, StorageError> {
        let file = Self::create(path).await?;
        Ok(Box::new(DiskWriter {
            file,
            path: path.to_path_buf(),
            written: 0,
        }))
    }

    async fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Open file being filled chunk by chunk
pub struct DiskWriter {
    file: fs::File,
    path: PathBuf,
    written: u64,
}

#[async_trait]
impl SinkWriter for DiskWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", self.path.display(), e)))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, StorageError> {
        self.file
            .flush()
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", self.path.display(), e)))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| StorageError::Sync(format!("{}: {}", self.path.display(), e)))?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/deeper/file.bin");

        let written = DiskSink::new()
            .write(&path, BufferedBody::from_bytes(Bytes::from_static(b"payload")))
            .await
            .unwrap();

        assert_eq!(written, 7);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_write_overwrites_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("same.txt");
        tokio::fs::write(&path, b"an older and longer content").await.unwrap();

        DiskSink::new()
            .write(&path, BufferedBody::from_bytes(Bytes::from_static(b"new")))
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_streaming_writer_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("streamed.txt");
        let sink = DiskSink::new();

        let mut writer = sink.open(&path).await.unwrap();
        writer.write_chunk(b"part one, ").await.unwrap();
        writer.write_chunk(b"part two").await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 18);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"part one, part two");

        sink.remove(&path).await.unwrap();
        assert!(!path.exists());
        // already gone
        sink.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_into_file_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let result = DiskSink::new()
            .write(&blocker.join("child.txt"), BufferedBody::default())
            .await;

        assert!(matches!(result, Err(StorageError::Create(_))));
    }
}
