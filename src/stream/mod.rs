//! Stream Module - per-part byte plumbing
//!
//! Counting and buffering stages that sit between the multipart parser and
//! the storage sink. Each part owns its own counter and buffer.

mod buffer;
mod counter;

pub use buffer::{BufferedBody, PartBuffer};
pub use counter::{ByteCounter, ContentHash};
