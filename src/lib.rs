//! # recfile - Block-Framed Record Files
//!
//! recfile is a file format and library for sequences of records, typically
//! serialized protocol-buffer messages. It prioritizes:
//!
//! - **Dense packing**: records are concatenated and compressed per chunk
//! - **Seekability**: 64 KiB block framing makes any position resolvable
//!   to its chunk with two header reads
//! - **Damage tolerance**: every header and payload is hashed; recovery
//!   skips exactly the damaged bytes and resumes
//!
//! ## Quick Start
//!
//! ```ignore
//! use recfile::{MmapSource, RecordReader};
//!
//! let mut reader = RecordReader::new(MmapSource::open("events.rec")?);
//! while let Some(record) = reader.read_record()? {
//!     handle(record);
//! }
//! ```
//!
//! ## Architecture
//!
//! Three decoder layers, each owning one concern:
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │   RecordReader / RecordWriter         │  iteration, seeks, recovery
//! ├───────────────────────────────────────┤
//! │   ChunkDecoder (simple / transposed)  │  records of one chunk
//! ├───────────────────────────────────────┤
//! │   ChunkReader / ChunkWriter           │  block framing, hashing
//! ├───────────────────────────────────────┤
//! │   ByteSource (slice / mmap / stream)  │  pull-based byte access
//! └───────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! offset 0:      block 0 header (24 bytes)
//!                signature chunk (40-byte header, empty payload)
//!                [metadata chunk]
//!                data chunks..., block headers at every 64 KiB
//! ```
//!
//! Chunks carry a 64-bit hash of their header and of their payload; block
//! headers carry offsets to the chunk straddling them, which is what makes
//! forward re-synchronization after corruption possible.
//!
//! ## Failure Model
//!
//! Corruption surfaces as a `DataLoss` error that leaves the reader in a
//! failed-but-recoverable state; `recover` (or an installed recovery
//! callback) skips the damaged region, reports it, and resumes. Clean
//! end-of-file is never an error.
//!
//! ## Module Overview
//!
//! - [`source`]: byte sources (borrowed memory, mmap, sequential streams)
//! - [`chunks`]: block framing, chunk headers, chunk reader/writer
//! - [`encoding`]: simple and transposed encodings, compression, projection
//! - [`records`]: record reader/writer, positions, metadata
//! - [`hashing`]: the format's 64-bit content hash
//! - [`error`]: typed error kinds carried through `eyre`

pub mod chunks;
pub mod encoding;
pub mod error;
pub mod hashing;
pub mod records;
pub mod source;

pub use encoding::compression::CompressionType;
pub use encoding::projection::{FieldProjection, ProjectionPath, Terminator};
pub use error::{ErrorKind, ReadError};
pub use records::{
    ReaderOptions, Recoverable, RecordPosition, RecordReader, RecordWriter, RecordsMetadata,
    RecordsMetadataDescriptors, SkippedRegion, WriterOptions,
};
pub use source::{ByteSource, MmapSource, SliceSource, StreamSource};
