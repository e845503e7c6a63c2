//! # Chunk Writer
//!
//! Writes chunks to a byte sink, interleaving a block header at every
//! 64 KiB boundary the chunk's span touches and zero-padding every payload
//! to an 8-byte multiple. The writer computes block-header offsets exactly
//! the way the reader validates them: both offsets describe the chunk that
//! contains the boundary.
//!
//! [`pad_to_block_boundary`](ChunkWriter::pad_to_block_boundary) emits a
//! padding chunk sized so the next chunk begins exactly at a block
//! boundary, which makes that chunk locatable by block-header arithmetic
//! alone. When fewer than 40 bytes remain in the current block (no room for
//! a chunk header), the padding chunk spans into the next block and ends at
//! the boundary after it.

use std::io::Write;

use eyre::Result;

use crate::chunks::block::{self, BlockHeader, BLOCK_HEADER_SIZE, BLOCK_SIZE};
use crate::chunks::header::{Chunk, CHUNK_HEADER_SIZE};
use crate::error::failed_precondition;
use zerocopy::IntoBytes;

/// Writes block-framed chunks to an `io::Write` sink.
#[derive(Debug)]
pub struct ChunkWriter<W> {
    dest: W,
    /// Position of the next chunk to be written.
    pos: u64,
}

impl<W: Write> ChunkWriter<W> {
    /// Starts writing at position 0 (the beginning of a file).
    pub fn new(dest: W) -> Self {
        Self { dest, pos: 0 }
    }

    /// Position of the next chunk: the begin of whatever is written next.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Writes one chunk, interleaving block headers as its span crosses
    /// 64 KiB boundaries.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        if chunk.header.data_size() != chunk.data.len() as u64 {
            return Err(failed_precondition(format!(
                "chunk header claims {} payload bytes, chunk holds {}",
                chunk.header.data_size(),
                chunk.data.len()
            )));
        }

        let chunk_begin = self.pos;
        let padding = chunk.header.padding_size() as usize;
        let content_size = chunk.header.content_size()?;
        let chunk_end = block::interleaved_end(chunk_begin, content_size)?;

        let mut content = Vec::with_capacity(content_size as usize);
        content.extend_from_slice(chunk.header.as_bytes());
        content.extend_from_slice(&chunk.data);
        content.resize(content.len() + padding, 0);

        let mut cur = chunk_begin;
        let mut off = 0usize;
        while cur < chunk_end {
            if block::is_block_boundary(cur) {
                let header = BlockHeader::new(cur - chunk_begin, chunk_end - cur);
                self.dest.write_all(header.as_bytes())?;
                cur += BLOCK_HEADER_SIZE as u64;
                continue;
            }
            let run = block::remaining_in_block(cur).min((content.len() - off) as u64) as usize;
            self.dest.write_all(&content[off..off + run])?;
            off += run;
            cur += run as u64;
        }

        self.pos = chunk_end;
        Ok(())
    }

    /// Emits a padding chunk so the next chunk begins at a block boundary.
    /// A no-op when already on one.
    pub fn pad_to_block_boundary(&mut self) -> Result<()> {
        if block::is_block_boundary(self.pos) {
            return Ok(());
        }
        let remaining = block::remaining_in_block(self.pos);
        // Positions are always 8-aligned (every chunk's content is), so the
        // padding payload needs no alignment of its own.
        let data_size = if remaining >= CHUNK_HEADER_SIZE as u64 {
            remaining - CHUNK_HEADER_SIZE as u64
        } else {
            // No room for a chunk header before the boundary: span the next
            // block and end at the boundary after it.
            remaining + BLOCK_SIZE - CHUNK_HEADER_SIZE as u64 - BLOCK_HEADER_SIZE as u64
        };
        self.write_chunk(&Chunk::padding(data_size)?)
    }

    /// Flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()?;
        Ok(())
    }

    /// Flushes and returns the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.dest.flush()?;
        Ok(self.dest)
    }
}
