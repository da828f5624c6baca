//! Blob upload session bookkeeping.
//!
//! Tracks the server-issued upload location and the byte offset of a single
//! blob upload so that chunk ranges tile the blob exactly.

use std::fmt;

use reqwest::Url;
use ukpack_core::config::DEFAULT_CHUNK_SIZE;
use ukpack_core::error::{PackError, Result};

use crate::digest::Digest;

/// How blob bytes are sent after the upload session is initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// PATCH requests of at most `chunk_size` bytes, then a committing PUT
    Chunked { chunk_size: usize },
    /// A single PUT carrying the whole blob
    Monolithic,
}

impl Default for UploadMode {
    fn default() -> Self {
        Self::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Inclusive byte range of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Formats as the `Content-Range` value `<start>-<end>`.
impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `total` bytes into consecutive chunks of at most `chunk_size`.
///
/// Ranges are produced lazily. An empty blob has no chunks.
pub fn chunk_ranges(total: u64, chunk_size: u64) -> Result<ChunkRanges> {
    if chunk_size == 0 {
        return Err(PackError::Validation(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    Ok(ChunkRanges {
        next: 0,
        total,
        chunk_size,
    })
}

/// Iterator over the chunk ranges of one blob.
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    next: u64,
    total: u64,
    chunk_size: u64,
}

impl Iterator for ChunkRanges {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.chunk_size).min(self.total) - 1;
        self.next = end + 1;
        Some(ByteRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next).div_ceil(self.chunk_size);
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// State of one blob upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    location: Url,
    offset: u64,
}

impl UploadSession {
    pub fn new(location: Url) -> Self {
        Self {
            location,
            offset: 0,
        }
    }

    /// URL the next request of this session goes to.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Bytes accepted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Record an accepted chunk and an optional new location from the server.
    pub fn advance(&mut self, range: ByteRange, location: Option<Url>) -> Result<()> {
        if range.start != self.offset {
            return Err(PackError::Validation(format!(
                "chunk {} does not start at offset {}",
                range, self.offset
            )));
        }
        self.offset = range.end + 1;
        if let Some(location) = location {
            self.location = location;
        }
        Ok(())
    }

    /// Location with the `digest` query parameter that commits the upload.
    pub fn commit_url(&self, digest: &Digest) -> Url {
        let mut url = self.location.clone();
        url.query_pairs_mut().append_pair("digest", &digest.to_string());
        url
    }
}
