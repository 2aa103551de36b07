//! In-memory part buffer
//!
//! Holds a part's chunks while validation is pending. A rejected part is
//! discarded at once and refuses further chunks, so an oversized upload
//! cannot keep growing memory.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Filling,
    Discarded,
    Taken,
}

/// Accumulates the chunks of one part
#[derive(Debug)]
pub struct PartBuffer {
    chunks: Vec<Bytes>,
    len: usize,
    state: BufferState,
}

impl PartBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            state: BufferState::Filling,
        }
    }

    /// Append a chunk. Returns `false` (and drops the chunk) once the buffer
    /// has been discarded or taken.
    pub fn push(&mut self, chunk: Bytes) -> bool {
        if self.state != BufferState::Filling {
            return false;
        }
        if !chunk.is_empty() {
            self.len += chunk.len();
            self.chunks.push(chunk);
        }
        true
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_discarded(&self) -> bool {
        self.state == BufferState::Discarded
    }

    /// Drop everything buffered so far; returns the number of bytes released
    pub fn discard(&mut self) -> usize {
        let released = self.len;
        self.chunks = Vec::new();
        self.len = 0;
        if self.state == BufferState::Filling {
            self.state = BufferState::Discarded;
        }
        released
    }

    /// Hand the buffered bytes over, exactly once
    pub fn take(&mut self) -> Option<BufferedBody> {
        if self.state != BufferState::Filling {
            return None;
        }
        self.state = BufferState::Taken;
        let chunks = std::mem::take(&mut self.chunks);
        let len = std::mem::replace(&mut self.len, 0);
        Some(BufferedBody { chunks, len })
    }
}

impl Default for PartBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete body of an accepted part.
///
/// Chunks can be walked any number of times; the sink writes them in order.
#[derive(Debug, Clone, Default)]
pub struct BufferedBody {
    chunks: Vec<Bytes>,
    len: usize,
}

impl BufferedBody {
    /// Build a body from a single contiguous buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len();
        let chunks = if data.is_empty() { vec![] } else { vec![data] };
        Self { chunks, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunks in arrival order
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Join the chunks into one contiguous buffer
    pub fn into_bytes(self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.into_iter().next().unwrap_or_default(),
            _ => {
                let mut joined = BytesMut::with_capacity(self.len);
                for chunk in &self.chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }
}
