//! # Block Framing
//!
//! Record files are partitioned into fixed 64 KiB blocks. Every block begins
//! with a 24-byte block header; chunks cross block boundaries freely and the
//! interleaved headers are invisible to every layer above the chunk reader.
//!
//! ## Block Header Layout
//!
//! ```text
//! +------------------+---------------------------+-----------------------+
//! | header_hash (u64)| previous_chunk_offset(u64)| next_chunk_offset(u64)|
//! +------------------+---------------------------+-----------------------+
//! ```
//!
//! All fields little-endian. `header_hash` is the content hash of the 16
//! bytes that follow it. Both offsets describe the chunk that contains this
//! block boundary:
//!
//! - `previous_chunk_offset`: distance from the block begin back to that
//!   chunk's begin (0 when a chunk begins exactly at the boundary),
//! - `next_chunk_offset`: distance from the block begin forward to that
//!   chunk's end, which is the begin of the next chunk.
//!
//! The redundancy makes block boundaries self-describing: after corruption a
//! reader can scan forward to any boundary and locate the surrounding chunk
//! begins without trusting anything before the boundary.
//!
//! ## Interleave Math
//!
//! Chunk positions are physical file offsets, and a chunk that begins at a
//! block boundary spans the block header at its front. [`interleaved_end`]
//! maps (chunk begin, content length) to the chunk's end offset, stepping
//! over every block header the span touches.

use eyre::Result;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{data_loss, overflow};
use crate::hashing::content_hash;

/// Fixed block size of the file format.
pub const BLOCK_SIZE: u64 = 1 << 16;

/// Serialized size of a block header.
pub const BLOCK_HEADER_SIZE: usize = 24;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    header_hash: U64,
    previous_chunk_offset: U64,
    next_chunk_offset: U64,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    pub fn new(previous_chunk_offset: u64, next_chunk_offset: u64) -> Self {
        Self {
            header_hash: U64::new(Self::compute_hash(previous_chunk_offset, next_chunk_offset)),
            previous_chunk_offset: U64::new(previous_chunk_offset),
            next_chunk_offset: U64::new(next_chunk_offset),
        }
    }

    /// Parses a block header and verifies its internal hash.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        eyre::ensure!(
            bytes.len() >= BLOCK_HEADER_SIZE,
            "buffer too small for BlockHeader: {} < {}",
            bytes.len(),
            BLOCK_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..BLOCK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse BlockHeader: {:?}", e))?;

        if !header.hash_is_valid() {
            return Err(data_loss("block header hash mismatch"));
        }

        Ok(header)
    }

    /// Hash check alone, for recovery scans that must not error on garbage.
    pub fn parse_lenient(bytes: &[u8]) -> Option<&Self> {
        let header = Self::ref_from_bytes(bytes.get(..BLOCK_HEADER_SIZE)?).ok()?;
        header.hash_is_valid().then_some(header)
    }

    fn hash_is_valid(&self) -> bool {
        self.header_hash.get()
            == Self::compute_hash(
                self.previous_chunk_offset.get(),
                self.next_chunk_offset.get(),
            )
    }

    fn compute_hash(previous_chunk_offset: u64, next_chunk_offset: u64) -> u64 {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&previous_chunk_offset.to_le_bytes());
        buf[8..].copy_from_slice(&next_chunk_offset.to_le_bytes());
        content_hash(&buf)
    }

    pub fn header_hash(&self) -> u64 {
        self.header_hash.get()
    }

    pub fn previous_chunk_offset(&self) -> u64 {
        self.previous_chunk_offset.get()
    }

    pub fn next_chunk_offset(&self) -> u64 {
        self.next_chunk_offset.get()
    }
}

#[inline]
pub fn is_block_boundary(pos: u64) -> bool {
    pos % BLOCK_SIZE == 0
}

/// Begin of the block containing `pos`.
#[inline]
pub fn block_begin(pos: u64) -> u64 {
    pos - pos % BLOCK_SIZE
}

/// First block boundary strictly after `pos`.
pub fn next_block_begin(pos: u64) -> Result<u64> {
    block_begin(pos)
        .checked_add(BLOCK_SIZE)
        .ok_or_else(|| overflow("next block boundary exceeds u64"))
}

/// Bytes until the next block boundary; `BLOCK_SIZE` when on a boundary.
#[inline]
pub fn remaining_in_block(pos: u64) -> u64 {
    BLOCK_SIZE - pos % BLOCK_SIZE
}

/// End offset of a chunk with `content_len` content bytes beginning at
/// `chunk_begin`, accounting for every interleaved block header the span
/// touches (including one at `chunk_begin` itself when it is a boundary).
pub fn interleaved_end(chunk_begin: u64, content_len: u64) -> Result<u64> {
    let mut pos = chunk_begin;
    let mut remaining = content_len;
    loop {
        if remaining == 0 {
            return Ok(pos);
        }
        if is_block_boundary(pos) {
            pos = pos
                .checked_add(BLOCK_HEADER_SIZE as u64)
                .ok_or_else(|| overflow("chunk end exceeds u64"))?;
        }
        let step = remaining.min(remaining_in_block(pos));
        pos = pos
            .checked_add(step)
            .ok_or_else(|| overflow("chunk end exceeds u64"))?;
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_size_is_24() {
        assert_eq!(std::mem::size_of::<BlockHeader>(), 24);
    }

    #[test]
    fn block_header_roundtrip() {
        let header = BlockHeader::new(100, 65436);
        let parsed = BlockHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.previous_chunk_offset(), 100);
        assert_eq!(parsed.next_chunk_offset(), 65436);
    }

    #[test]
    fn block_header_rejects_flipped_offset() {
        let header = BlockHeader::new(0, 4096);
        let mut bytes = [0u8; 24];
        bytes.copy_from_slice(header.as_bytes());
        bytes[9] ^= 0x40;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
        assert!(BlockHeader::parse_lenient(&bytes).is_none());
    }

    #[test]
    fn block_header_rejects_flipped_hash() {
        let header = BlockHeader::new(0, 4096);
        let mut bytes = [0u8; 24];
        bytes.copy_from_slice(header.as_bytes());
        bytes[0] ^= 0x01;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn boundary_predicates() {
        assert!(is_block_boundary(0));
        assert!(is_block_boundary(BLOCK_SIZE));
        assert!(is_block_boundary(3 * BLOCK_SIZE));
        assert!(!is_block_boundary(1));
        assert!(!is_block_boundary(BLOCK_SIZE - 1));

        assert_eq!(block_begin(0), 0);
        assert_eq!(block_begin(BLOCK_SIZE - 1), 0);
        assert_eq!(block_begin(BLOCK_SIZE), BLOCK_SIZE);
        assert_eq!(block_begin(BLOCK_SIZE + 5), BLOCK_SIZE);

        assert_eq!(next_block_begin(0).unwrap(), BLOCK_SIZE);
        assert_eq!(next_block_begin(BLOCK_SIZE).unwrap(), 2 * BLOCK_SIZE);
        assert_eq!(next_block_begin(BLOCK_SIZE + 1).unwrap(), 2 * BLOCK_SIZE);

        assert_eq!(remaining_in_block(0), BLOCK_SIZE);
        assert_eq!(remaining_in_block(10), BLOCK_SIZE - 10);
    }

    #[test]
    fn interleaved_end_within_one_block() {
        // Chunk begins mid-block and fits before the next boundary.
        assert_eq!(interleaved_end(64, 100).unwrap(), 164);
    }

    #[test]
    fn interleaved_end_at_file_start() {
        // A chunk beginning at offset 0 spans the block 0 header.
        assert_eq!(interleaved_end(0, 40).unwrap(), 64);
    }

    #[test]
    fn interleaved_end_crossing_one_boundary() {
        // 100 content bytes beginning 10 bytes before a boundary.
        let begin = BLOCK_SIZE - 10;
        assert_eq!(
            interleaved_end(begin, 100).unwrap(),
            begin + 100 + BLOCK_HEADER_SIZE as u64
        );
    }

    #[test]
    fn interleaved_end_landing_exactly_on_boundary() {
        // The end may be a boundary; the next block header belongs to the
        // following chunk.
        let begin = BLOCK_SIZE - 10;
        assert_eq!(interleaved_end(begin, 10).unwrap(), BLOCK_SIZE);
    }

    #[test]
    fn interleaved_end_spanning_multiple_blocks() {
        let content = 3 * BLOCK_SIZE;
        let end = interleaved_end(24, content).unwrap();
        // Boundaries at 1x, 2x, 3x BLOCK_SIZE are crossed: three headers.
        assert_eq!(end, 24 + content + 3 * BLOCK_HEADER_SIZE as u64);
    }

    #[test]
    fn interleaved_end_overflow_is_reported() {
        assert!(interleaved_end(u64::MAX - 10, 100).is_err());
    }
}
