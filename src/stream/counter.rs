//! Byte counting pass-through for part bodies
//!
//! Counts and hashes (BLAKE3) every chunk on its way from the parser to the
//! part handler. Chunks are forwarded untouched and in order.

use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Content hash of a part body (BLAKE3, 32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash data in one shot
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Pass-through stream stage that counts the bytes flowing through it.
///
/// The counter never enforces a limit itself; callers ask [`ByteCounter::exceeds`]
/// after each chunk and decide what to do.
pub struct ByteCounter<S> {
    inner: S,
    total: u64,
    chunks: u64,
    hasher: blake3::Hasher,
}

impl<S> ByteCounter<S> {
    /// Wrap a part body
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            total: 0,
            chunks: 0,
            hasher: blake3::Hasher::new(),
        }
    }

    /// Bytes forwarded so far
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Chunks forwarded so far
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Whether the running total is above `limit` (no limit never exceeds)
    pub fn exceeds(&self, limit: Option<u64>) -> bool {
        limit.is_some_and(|max| self.total > max)
    }

    /// Hash of everything forwarded so far
    pub fn digest(&self) -> ContentHash {
        ContentHash(*self.hasher.finalize().as_bytes())
    }
}

impl<S> Stream for ByteCounter<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.total += chunk.len() as u64;
                this.chunks += 1;
                this.hasher.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_counts_and_forwards_in_order() {
        let mut counter = ByteCounter::new(chunks(&[b"hello ", b"multipart ", b"world"]));

        let mut seen = Vec::new();
        while let Some(chunk) = counter.next().await {
            seen.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(seen, b"hello multipart world");
        assert_eq!(counter.total(), 21);
        assert_eq!(ByteCounter::chunks(&counter), 3);
        assert_eq!(counter.digest(), ContentHash::hash(b"hello multipart world"));
    }

    #[tokio::test]
    async fn test_exceeds_is_strict() {
        let mut counter = ByteCounter::new(chunks(&[b"12345", b"6"]));

        counter.next().await;
        assert!(!counter.exceeds(Some(5)));
        assert!(!counter.exceeds(None));

        counter.next().await;
        assert!(counter.exceeds(Some(5)));
    }

    #[tokio::test]
    async fn test_errors_pass_through_uncounted() {
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut counter = ByteCounter::new(stream::iter(items));

        assert!(counter.next().await.unwrap().is_ok());
        assert!(counter.next().await.unwrap().is_err());
        assert_eq!(counter.total(), 3);
    }

    #[test]
    fn test_hash_hex_length() {
        let hash = ContentHash::hash(b"data");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.to_string(), hash.to_hex());
    }
}
