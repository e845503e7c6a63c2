//! # Chunk Decoder
//!
//! Turns one [`Chunk`] into an indexable table of records and a cursor over
//! them. The decoder dispatches on the chunk type:
//!
//! | Chunk type | Records |
//! |------------|---------|
//! | FileSignature, Padding, FileMetadata | none |
//! | Simple | size-table slices of the decompressed concatenation |
//! | Transposed | reassembled messages, honoring the field projection |
//!
//! (Metadata payloads are decoded explicitly by the record reader's
//! metadata path, not by the record cursor.)
//!
//! ## Invariants
//!
//! While healthy: the record table's `limits` are sorted, the last limit
//! equals the value bytes' length, and `index <= num_records`. The cursor
//! remembers the span of the record it most recently stepped over, which is
//! what [`current`](ChunkDecoder::current) returns.
//!
//! ## Failure and Recovery
//!
//! Decode failures poison the decoder; [`recover`](ChunkDecoder::recover)
//! returns `false` for them and the owner is expected to [`clear`] and move
//! past the chunk, keeping whatever records were already consumed. The one
//! decoder-recoverable failure is a record that would not parse as a typed
//! message: [`mark_record_unparsable`] rolls the cursor back onto the bad
//! record and `recover` steps over exactly that record.
//!
//! [`clear`]: ChunkDecoder::clear
//! [`mark_record_unparsable`]: ChunkDecoder::mark_record_unparsable

use bumpalo::Bump;
use eyre::Result;

use crate::chunks::header::{Chunk, ChunkType};
use crate::encoding::compression::DecompressorPool;
use crate::encoding::projection::FieldProjection;
use crate::encoding::{simple, transpose, DecodedRecords};
use crate::error::{data_loss, ErrorKind};

#[derive(Debug)]
struct Failure {
    message: String,
    /// Set for an unparsable record; `recover` skips just that record.
    skip_one_record: bool,
}

/// Decodes chunks and serves their records in index order.
pub struct ChunkDecoder {
    projection: FieldProjection,
    records: DecodedRecords,
    index: u64,
    /// Span of the record most recently stepped over.
    current: (usize, usize),
    failure: Option<Failure>,
    pool: DecompressorPool,
    arena: Bump,
}

impl std::fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("num_records", &self.num_records())
            .field("index", &self.index)
            .field("failed", &self.failure.is_some())
            .finish()
    }
}

impl ChunkDecoder {
    pub fn new(projection: FieldProjection) -> Self {
        Self {
            projection,
            records: DecodedRecords::default(),
            index: 0,
            current: (0, 0),
            failure: None,
            pool: DecompressorPool::new(),
            arena: Bump::new(),
        }
    }

    /// Resets to an empty chunk. Keeps the projection and the context pool.
    pub fn clear(&mut self) {
        self.records = DecodedRecords::default();
        self.index = 0;
        self.current = (0, 0);
        self.failure = None;
    }

    /// Parses `chunk` into the record table.
    pub fn decode(&mut self, chunk: &Chunk) -> Result<()> {
        self.clear();
        self.arena.reset();

        let result = self.decode_inner(chunk);
        if let Err(report) = &result {
            let (_, message) = crate::error::split_report(report);
            self.records = DecodedRecords::default();
            self.failure = Some(Failure {
                message,
                skip_one_record: false,
            });
        }
        result
    }

    fn decode_inner(&mut self, chunk: &Chunk) -> Result<()> {
        let chunk_type = chunk.header.chunk_type()?;
        let num_records = chunk.header.num_records();
        let decoded_data_size = chunk.header.decoded_data_size();

        match chunk_type {
            ChunkType::FileSignature | ChunkType::Padding | ChunkType::FileMetadata => {
                if num_records != 0 {
                    return Err(data_loss(format!(
                        "{:?} chunk claims {} records",
                        chunk_type, num_records
                    )));
                }
            }
            ChunkType::Simple => {
                self.records =
                    simple::decode(&chunk.data, num_records, decoded_data_size, &mut self.pool)?;
            }
            ChunkType::Transposed => {
                self.records = transpose::decode(
                    &chunk.data,
                    num_records,
                    &self.projection,
                    &mut self.pool,
                    &self.arena,
                )?;
                if self.projection.includes_all()
                    && self.records.values.len() as u64 != decoded_data_size
                {
                    let got = self.records.values.len();
                    return Err(data_loss(format!(
                        "transposed chunk decoded to {} bytes, header promised {}",
                        got, decoded_data_size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Steps the cursor over the next record. Returns `false` at the end of
    /// the chunk or while failed; [`current`](Self::current) then holds the
    /// record just stepped over.
    pub fn advance_record(&mut self) -> bool {
        if self.failure.is_some() || self.index >= self.num_records() {
            return false;
        }
        self.current = self.records.bounds(self.index as usize);
        self.index += 1;
        true
    }

    /// The record most recently stepped over by `advance_record`.
    pub fn current(&self) -> &[u8] {
        &self.records.values[self.current.0..self.current.1]
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn num_records(&self) -> u64 {
        self.records.num_records()
    }

    /// Moves the cursor. Indices beyond the end clamp to the end, leaving
    /// the decoder exhausted.
    pub fn set_index(&mut self, index: u64) {
        self.index = index.min(self.num_records());
        self.current = (0, 0);
    }

    /// Marks the record the cursor just stepped over as unparsable. The
    /// cursor rolls back onto it; `recover` will step past it.
    pub fn mark_record_unparsable(&mut self, message: impl Into<String>) {
        debug_assert!(self.index > 0, "no record has been read");
        self.index = self.index.saturating_sub(1);
        self.failure = Some(Failure {
            message: message.into(),
            skip_one_record: true,
        });
    }

    /// Decodes a file metadata chunk's payload: a single transposed record
    /// holding the serialized metadata message. The record cursor is not
    /// touched.
    pub fn decode_metadata(&mut self, chunk: &Chunk) -> Result<Vec<u8>> {
        if chunk.header.chunk_type_raw() != ChunkType::FileMetadata as u8 {
            return Err(crate::error::failed_precondition(
                "decode_metadata on a chunk that is not file metadata",
            ));
        }
        if chunk.header.num_records() != 0 {
            return Err(data_loss(format!(
                "invalid file metadata chunk: number of records is not zero: {}",
                chunk.header.num_records()
            )));
        }
        self.arena.reset();
        let decoded = transpose::decode(
            &chunk.data,
            1,
            &FieldProjection::all(),
            &mut self.pool,
            &self.arena,
        )?;
        if decoded.values.len() as u64 != chunk.header.decoded_data_size() {
            return Err(data_loss(format!(
                "file metadata decoded to {} bytes, header promised {}",
                decoded.values.len(),
                chunk.header.decoded_data_size()
            )));
        }
        Ok(decoded.values)
    }

    /// Attempts decoder-level recovery. Only an unparsable-record failure
    /// is recoverable here; everything else reports `false` and the caller
    /// clears the decoder.
    pub fn recover(&mut self) -> bool {
        match self.failure.take() {
            Some(failure) if failure.skip_one_record => {
                self.set_index(self.index + 1);
                true
            }
            Some(failure) => {
                self.failure = Some(failure);
                false
            }
            None => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The stored failure as a fresh report, if any.
    pub fn failure(&self) -> Option<eyre::Report> {
        self.failure
            .as_ref()
            .map(|f| ErrorKind::DataLoss.to_report(f.message.clone()))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new(FieldProjection::all())
    }
}
