//! # Chunk Headers
//!
//! A chunk is the unit of encoded records: a 40-byte header followed by
//! `data_size` payload bytes and zero-padding up to the next 8-byte multiple.
//!
//! ## Chunk Header Layout
//!
//! ```text
//! +-----------+-----------+---------------------------+-------------------+-------------+
//! | data_hash | data_size | chunk_type_and_num_records| decoded_data_size | header_hash |
//! +-----------+-----------+---------------------------+-------------------+-------------+
//! ```
//!
//! All fields u64 little-endian. `chunk_type_and_num_records` packs the
//! chunk type into the low 8 bits and the record count into the high 56.
//! `header_hash` is the content hash of the first 32 bytes; `data_hash` is
//! the content hash of exactly `data_size` payload bytes. Padding is covered
//! by neither hash.
//!
//! Either hash mismatching is data loss. A valid `header_hash` is what makes
//! a byte offset a plausible chunk begin during recovery scans.

use eyre::Result;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{data_loss, overflow};
use crate::hashing::content_hash;

/// Serialized size of a chunk header.
pub const CHUNK_HEADER_SIZE: usize = 40;

/// Largest record count a chunk header can carry (56 bits).
pub const MAX_NUM_RECORDS: u64 = (1 << 56) - 1;

/// Classification of a chunk's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// First chunk of every file; zero records, zero-byte payload.
    FileSignature = b's',
    /// Optional second chunk holding serialized `RecordsMetadata`.
    FileMetadata = b'm',
    /// Zero-record filler used to align the next chunk to a block boundary.
    Padding = b'p',
    /// Concatenated records plus a size table.
    Simple = b'r',
    /// Column-oriented encoding with field projection support.
    Transposed = b't',
}

impl TryFrom<u8> for ChunkType {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            b's' => Ok(ChunkType::FileSignature),
            b'm' => Ok(ChunkType::FileMetadata),
            b'p' => Ok(ChunkType::Padding),
            b'r' => Ok(ChunkType::Simple),
            b't' => Ok(ChunkType::Transposed),
            _ => Err(data_loss(format!("unknown chunk type: 0x{:02x}", value))),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ChunkHeader {
    data_hash: U64,
    data_size: U64,
    chunk_type_and_num_records: U64,
    decoded_data_size: U64,
    header_hash: U64,
}

const _: () = assert!(std::mem::size_of::<ChunkHeader>() == CHUNK_HEADER_SIZE);

impl ChunkHeader {
    /// Builds a header for `data`, computing both hashes.
    pub fn new(
        chunk_type: ChunkType,
        data: &[u8],
        num_records: u64,
        decoded_data_size: u64,
    ) -> Result<Self> {
        if num_records > MAX_NUM_RECORDS {
            return Err(overflow(format!(
                "record count {} does not fit in 56 bits",
                num_records
            )));
        }
        let mut header = Self {
            data_hash: U64::new(content_hash(data)),
            data_size: U64::new(data.len() as u64),
            chunk_type_and_num_records: U64::new((num_records << 8) | chunk_type as u64),
            decoded_data_size: U64::new(decoded_data_size),
            header_hash: U64::new(0),
        };
        header.header_hash = U64::new(content_hash(&header.as_bytes()[..32]));
        Ok(header)
    }

    /// Parses a chunk header and verifies `header_hash`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        eyre::ensure!(
            bytes.len() >= CHUNK_HEADER_SIZE,
            "buffer too small for ChunkHeader: {} < {}",
            bytes.len(),
            CHUNK_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..CHUNK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ChunkHeader: {:?}", e))?;

        if !header.hash_is_valid() {
            return Err(data_loss("chunk header hash mismatch"));
        }

        Ok(header)
    }

    /// Hash check alone, for recovery scans that must not error on garbage.
    pub fn parse_lenient(bytes: &[u8]) -> Option<&Self> {
        let header = Self::ref_from_bytes(bytes.get(..CHUNK_HEADER_SIZE)?).ok()?;
        header.hash_is_valid().then_some(header)
    }

    fn hash_is_valid(&self) -> bool {
        self.header_hash.get() == content_hash(&self.as_bytes()[..32])
    }

    /// Verifies the payload hash over exactly `data_size` bytes.
    pub fn verify_data(&self, data: &[u8]) -> Result<()> {
        if self.data_hash.get() != content_hash(data) {
            return Err(data_loss("chunk payload hash mismatch"));
        }
        Ok(())
    }

    pub fn chunk_type_raw(&self) -> u8 {
        self.chunk_type_and_num_records.get() as u8
    }

    pub fn chunk_type(&self) -> Result<ChunkType> {
        ChunkType::try_from(self.chunk_type_raw())
    }

    pub fn num_records(&self) -> u64 {
        self.chunk_type_and_num_records.get() >> 8
    }

    /// Payload padding length to the next 8-byte multiple.
    pub fn padding_size(&self) -> u64 {
        self.data_size.get().wrapping_neg() % 8
    }

    /// Header, payload and padding: the chunk's content length, before block
    /// header interleaving.
    pub fn content_size(&self) -> Result<u64> {
        (CHUNK_HEADER_SIZE as u64)
            .checked_add(self.data_size.get())
            .and_then(|n| n.checked_add(self.padding_size()))
            .ok_or_else(|| overflow("chunk content size exceeds u64"))
    }

    pub fn data_hash(&self) -> u64 {
        self.data_hash.get()
    }

    pub fn data_size(&self) -> u64 {
        self.data_size.get()
    }

    pub fn decoded_data_size(&self) -> u64 {
        self.decoded_data_size.get()
    }

    pub fn header_hash(&self) -> u64 {
        self.header_hash.get()
    }
}

/// A materialized chunk: validated header plus payload bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(
        chunk_type: ChunkType,
        data: Vec<u8>,
        num_records: u64,
        decoded_data_size: u64,
    ) -> Result<Self> {
        let header = ChunkHeader::new(chunk_type, &data, num_records, decoded_data_size)?;
        Ok(Self { header, data })
    }

    /// The file signature chunk: zero records, zero-byte payload.
    pub fn signature() -> Self {
        Self::new(ChunkType::FileSignature, Vec::new(), 0, 0)
            .unwrap_or_else(|_| unreachable!("signature chunk fields are all zero"))
    }

    /// A padding chunk with `data_size` zero bytes of payload.
    pub fn padding(data_size: u64) -> Result<Self> {
        Self::new(ChunkType::Padding, vec![0u8; data_size as usize], 0, 0)
    }

    /// Whether this header looks like a well-formed file signature.
    pub fn is_valid_signature(header: &ChunkHeader) -> bool {
        header.chunk_type_raw() == ChunkType::FileSignature as u8
            && header.data_size() == 0
            && header.num_records() == 0
            && header.decoded_data_size() == 0
    }
}
