//! # Record Layer
//!
//! The user-facing surface: reading and writing whole files of records.
//!
//! ## Module Organization
//!
//! - `position`: record positions and skipped regions
//! - `metadata`: the file metadata message and descriptor resolution
//! - `reader`: the record reader state machine
//! - `writer`: the record writer

pub mod metadata;
pub mod position;
pub mod reader;
pub mod writer;

pub use metadata::{RecordsMetadata, RecordsMetadataDescriptors};
pub use position::{RecordPosition, SkippedRegion};
pub use reader::{ReaderOptions, Recoverable, RecordReader};
pub use writer::{RecordWriter, WriterOptions};
