//! # Byte Sources
//!
//! This module defines the pull-based byte access the chunk layer reads
//! from, plus the three concrete sources the crate ships: borrowed memory,
//! memory-mapped files, and arbitrary sequential streams.
//!
//! ## Access Model
//!
//! A [`ByteSource`] is a cursor over a byte sequence:
//!
//! - [`pull`](ByteSource::pull) buffers at least `min_len` bytes and returns
//!   the buffered view without consuming it. A shorter view means the source
//!   ended.
//! - [`advance`](ByteSource::advance) consumes bytes from the front of the
//!   last pulled view.
//! - [`position`](ByteSource::position) is the absolute offset of the next
//!   unconsumed byte.
//!
//! Random access (`seek`, `size`) is a capability, not a requirement: the
//! chunk reader only needs it for position-based seeks, and plain sequential
//! reading (including forward-scanning corruption recovery) works against
//! any source.
//!
//! ## Safety
//!
//! `MmapSource` maps the file with `memmap2`. The mapping is only valid
//! while no other process truncates the file; this is the usual contract for
//! read-only maps of immutable record files.
//!
//! ## Thread Safety
//!
//! Sources are single-cursor objects and are used by exactly one reader at a
//! time.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use eyre::Result;
use memmap2::Mmap;

use crate::error::unimplemented;

/// Pull-based byte access with optional random access.
pub trait ByteSource {
    /// Buffers at least `min_len` bytes and returns the buffered view.
    ///
    /// The returned slice may be longer than `min_len`; a slice shorter than
    /// `min_len` means the source ended. The cursor does not move.
    fn pull(&mut self, min_len: usize) -> Result<&[u8]>;

    /// Consumes `len` bytes. `len` must not exceed the length of the last
    /// pulled view.
    fn advance(&mut self, len: usize);

    /// Absolute offset of the next unconsumed byte.
    fn position(&self) -> u64;

    /// Whether `seek` and `size` are available.
    fn supports_random_access(&self) -> bool {
        false
    }

    /// Moves the cursor to an absolute offset. Offsets past the end position
    /// the cursor at the end.
    fn seek(&mut self, _pos: u64) -> Result<()> {
        Err(unimplemented("seek on a sequential-only byte source"))
    }

    /// Total size of the source in bytes.
    fn size(&mut self) -> Result<u64> {
        Err(unimplemented("size of a sequential-only byte source"))
    }
}

/// In-memory source borrowing a byte slice. Random access.
#[derive(Debug)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }
}

impl ByteSource for SliceSource<'_> {
    fn pull(&mut self, _min_len: usize) -> Result<&[u8]> {
        Ok(&self.data[self.cursor..])
    }

    fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.data.len() - self.cursor);
        self.cursor = (self.cursor + len).min(self.data.len());
    }

    fn position(&self) -> u64 {
        self.cursor as u64
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.cursor = (pos as usize).min(self.data.len());
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Memory-mapped file source. Random access, zero-copy pulls.
#[derive(Debug)]
pub struct MmapSource {
    map: Mmap,
    cursor: usize,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn from_file(file: &File) -> Result<Self> {
        // Safety: the map is read-only and record files are immutable once
        // written; callers must not truncate the file while it is mapped.
        let map = unsafe { Mmap::map(file)? };
        Ok(Self { map, cursor: 0 })
    }
}

impl ByteSource for MmapSource {
    fn pull(&mut self, _min_len: usize) -> Result<&[u8]> {
        Ok(&self.map[self.cursor..])
    }

    fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.map.len() - self.cursor);
        self.cursor = (self.cursor + len).min(self.map.len());
    }

    fn position(&self) -> u64 {
        self.cursor as u64
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.cursor = (pos as usize).min(self.map.len());
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.map.len() as u64)
    }
}

const STREAM_READ_CHUNK: usize = 64 * 1024;

/// Sequential source over any `io::Read`. No random access; forward motion
/// only.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    buf: Vec<u8>,
    /// Consumed prefix of `buf`.
    off: usize,
    /// Absolute position of `buf[off]`.
    abs: u64,
    eof: bool,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            off: 0,
            abs: 0,
            eof: false,
        }
    }

    fn available(&self) -> usize {
        self.buf.len() - self.off
    }

    fn refill(&mut self, min_len: usize) -> Result<()> {
        while self.available() < min_len && !self.eof {
            if self.off > 0 {
                self.buf.drain(..self.off);
                self.off = 0;
            }
            let old = self.buf.len();
            self.buf.resize(old + STREAM_READ_CHUNK, 0);
            let n = self.inner.read(&mut self.buf[old..])?;
            self.buf.truncate(old + n);
            if n == 0 {
                self.eof = true;
            }
        }
        Ok(())
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn pull(&mut self, min_len: usize) -> Result<&[u8]> {
        self.refill(min_len)?;
        Ok(&self.buf[self.off..])
    }

    fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.available());
        let len = len.min(self.available());
        self.off += len;
        self.abs += len as u64;
    }

    fn position(&self) -> u64 {
        self.abs
    }
}
