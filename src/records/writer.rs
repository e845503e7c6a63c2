//! # Record Writer
//!
//! The writing counterpart of the record reader: buffers records, cuts
//! them into chunks, and emits a well-formed file (signature chunk first,
//! optional metadata chunk, then data chunks interleaved with block
//! headers).
//!
//! ```ignore
//! let mut writer = RecordWriter::with_options(
//!     file,
//!     WriterOptions::new()
//!         .compression(CompressionType::Zstd)
//!         .transposed(true),
//! );
//! for entry in entries {
//!     writer.write_message(&entry)?;
//! }
//! writer.finish()?;
//! ```
//!
//! A chunk is cut when the buffered records reach the configured chunk
//! size, on [`flush`](RecordWriter::flush), and on
//! [`finish`](RecordWriter::finish). Transposed encoding requires records
//! that are serialized messages; byte records of arbitrary shape belong in
//! simple chunks (the default).

use std::io::Write;

use eyre::Result;
use prost::Message;

use crate::chunks::header::{Chunk, ChunkType};
use crate::chunks::writer::ChunkWriter;
use crate::encoding::compression::CompressionType;
use crate::encoding::{simple, transpose};
use crate::records::metadata::RecordsMetadata;
use crate::records::position::RecordPosition;

/// Buffered decoded bytes that trigger a chunk cut.
const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Construction options for a [`RecordWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    compression: CompressionType,
    transposed: bool,
    chunk_size: usize,
    metadata: Option<RecordsMetadata>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            transposed: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            metadata: None,
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Encodes data chunks column-wise. Records must be serialized
    /// messages.
    pub fn transposed(mut self, transposed: bool) -> Self {
        self.transposed = transposed;
        self
    }

    /// Buffered bytes after which a chunk is cut.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Emits a metadata chunk right after the signature.
    pub fn metadata(mut self, metadata: RecordsMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Writes records as a block-framed record file.
#[derive(Debug)]
pub struct RecordWriter<W> {
    chunk_writer: ChunkWriter<W>,
    options: WriterOptions,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
    started: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(dest: W) -> Self {
        Self::with_options(dest, WriterOptions::new())
    }

    pub fn with_options(dest: W, options: WriterOptions) -> Self {
        Self {
            chunk_writer: ChunkWriter::new(dest),
            options,
            pending: Vec::new(),
            pending_bytes: 0,
            started: false,
        }
    }

    /// Position the next written record will get.
    pub fn pos(&self) -> RecordPosition {
        RecordPosition::new(self.chunk_writer.pos(), self.pending.len() as u64)
    }

    /// Appends one record.
    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        self.ensure_started()?;
        self.pending_bytes += record.len();
        self.pending.push(record.to_vec());
        if self.pending_bytes >= self.options.chunk_size {
            self.cut_chunk()?;
        }
        Ok(())
    }

    /// Appends one record serialized from a message.
    pub fn write_message<M: Message>(&mut self, message: &M) -> Result<()> {
        self.write_record(&message.encode_to_vec())
    }

    /// Cuts the buffered records into a chunk and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.cut_chunk()?;
        self.chunk_writer.flush()
    }

    /// Cuts the buffered records and pads so the next chunk begins at a
    /// block boundary.
    pub fn pad_to_block_boundary(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.cut_chunk()?;
        self.chunk_writer.pad_to_block_boundary()
    }

    /// Finishes the file and returns the sink. An unwritten-to writer
    /// still produces a valid (signature-only) file.
    pub fn finish(mut self) -> Result<W> {
        self.ensure_started()?;
        self.cut_chunk()?;
        self.chunk_writer.into_inner()
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.chunk_writer.write_chunk(&Chunk::signature())?;
        if let Some(metadata) = &self.options.metadata {
            let serialized = metadata.encode_to_vec();
            let (payload, decoded_size) =
                transpose::encode(&[serialized], self.options.compression)?;
            let chunk = Chunk::new(ChunkType::FileMetadata, payload, 0, decoded_size)?;
            self.chunk_writer.write_chunk(&chunk)?;
        }
        self.started = true;
        Ok(())
    }

    fn cut_chunk(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let num_records = self.pending.len() as u64;
        let (chunk_type, payload, decoded_size) = if self.options.transposed {
            let (payload, decoded_size) =
                transpose::encode(&self.pending, self.options.compression)?;
            (ChunkType::Transposed, payload, decoded_size)
        } else {
            let (payload, decoded_size) = simple::encode(&self.pending, self.options.compression)?;
            (ChunkType::Simple, payload, decoded_size)
        };
        let chunk = Chunk::new(chunk_type, payload, num_records, decoded_size)?;
        self.chunk_writer.write_chunk(&chunk)?;
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }
}
