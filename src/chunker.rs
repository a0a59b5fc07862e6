//! # Content-Defined Chunking
//!
//! Splits a byte stream into variable-size chunks with the FastCDC (2020)
//! rolling-hash algorithm. Boundaries depend only on content and the
//! `(min, avg, max)` targets, so an unchanged file always produces the same
//! chunks — which is what makes the file-metadata cache and cross-snapshot
//! deduplication effective. A shifted prefix re-synchronises within a few
//! chunks instead of invalidating the whole file.
//!
//! The gear table and normalization masks are the published fastcdc v2020
//! variant; chunk lengths always lie in `[min, max]` and concatenating the
//! chunks reproduces the input exactly.

use std::io::Read;

use fastcdc::v2020::{self, StreamCDC};

use crate::error::SaveError;

/// Chunk size targets in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkerParams {
    pub min: u32,
    pub avg: u32,
    pub max: u32,
}

impl ChunkerParams {
    /// Balanced defaults: 1 MiB / 4 MiB / 16 MiB.
    pub const DEFAULT: ChunkerParams = ChunkerParams {
        min: 1024 * 1024,
        avg: 4 * 1024 * 1024,
        max: 16 * 1024 * 1024,
    };

    /// Checks ordering and the fastcdc v2020 parameter bounds.
    pub fn validate(&self) -> Result<(), SaveError> {
        if !(self.min <= self.avg && self.avg <= self.max) {
            return Err(SaveError::ChunkerBounds {
                message: format!(
                    "expected min <= avg <= max, got {}/{}/{}",
                    self.min, self.avg, self.max
                ),
            });
        }
        if self.min < v2020::MINIMUM_MIN
            || self.min > v2020::MINIMUM_MAX
            || self.avg < v2020::AVERAGE_MIN
            || self.avg > v2020::AVERAGE_MAX
            || self.max < v2020::MAXIMUM_MIN
            || self.max > v2020::MAXIMUM_MAX
        {
            return Err(SaveError::ChunkerBounds {
                message: format!(
                    "sizes out of range (min {}..={}, avg {}..={}, max {}..={})",
                    v2020::MINIMUM_MIN,
                    v2020::MINIMUM_MAX,
                    v2020::AVERAGE_MIN,
                    v2020::AVERAGE_MAX,
                    v2020::MAXIMUM_MIN,
                    v2020::MAXIMUM_MAX,
                ),
            });
        }
        Ok(())
    }
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One chunk cut from the stream, in scan order.
#[derive(Debug)]
pub struct Chunk {
    /// Zero-based position of the chunk within its file.
    pub index: usize,
    /// Plaintext chunk bytes.
    pub data: Vec<u8>,
}

/// Lazy, non-restartable chunk iterator over a readable stream.
pub struct ChunkStream<R: Read> {
    inner: StreamCDC<R>,
    index: usize,
}

impl<R: Read> ChunkStream<R> {
    pub fn new(source: R, params: ChunkerParams) -> Self {
        Self {
            inner: StreamCDC::new(source, params.min, params.avg, params.max),
            index: 0,
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = std::io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(match item {
            Ok(cut) => {
                let chunk = Chunk {
                    index: self.index,
                    data: cut.data,
                };
                self.index += 1;
                Ok(chunk)
            }
            Err(e) => Err(std::io::Error::other(e)),
        })
    }
}
