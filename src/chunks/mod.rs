//! # Chunk Layer
//!
//! Block framing and chunk materialization: everything between raw bytes
//! and validated [`Chunk`]s.
//!
//! ## File Layout
//!
//! ```text
//! offset 0:      block 0 header (24 bytes)
//!                signature chunk header (40 bytes)
//!                chunk 1..n, each: header + payload + padding,
//!                with a block header interleaved at every 64 KiB boundary
//! ```
//!
//! Chunk positions are physical file offsets; a chunk beginning at a block
//! boundary spans that boundary's block header. Block headers are invisible
//! above this layer.
//!
//! ## Module Organization
//!
//! - `block`: block constants, block headers, interleave arithmetic
//! - `header`: chunk headers, chunk types, hash validation
//! - `reader`: chunk materialization and corruption recovery
//! - `writer`: chunk serialization and block padding
//!
//! [`Chunk`]: header::Chunk

pub mod block;
pub mod header;
pub mod reader;
pub mod writer;

pub use block::{BlockHeader, BLOCK_HEADER_SIZE, BLOCK_SIZE};
pub use header::{Chunk, ChunkHeader, ChunkType, CHUNK_HEADER_SIZE};
pub use reader::ChunkReader;
pub use writer::ChunkWriter;
