//! # Simple Chunk Encoding
//!
//! A simple chunk stores its records as one compressed stream:
//!
//! ```text
//! +---------------------+------------------------------------------+
//! | compression id (u32)| compressed: [sizes varints][records data]|
//! +---------------------+------------------------------------------+
//! ```
//!
//! The stream begins with `num_records` LEB128 record sizes and continues
//! with the records' bytes back to back; the size table is under the same
//! compression as the records. After decompression the concatenation is
//! sliced by the size table, and the slice total must equal both the bytes
//! remaining in the stream and the header's `decoded_data_size`; any
//! disagreement is data loss.
//!
//! Field projection never applies here; simple records are returned
//! verbatim.

use eyre::Result;

use crate::encoding::compression::{compress, CompressionType, DecompressorPool};
use crate::encoding::varint::{push_varint, read_varint, MAX_VARINT_LEN};
use crate::encoding::DecodedRecords;
use crate::error::data_loss;

/// Decodes a simple chunk payload into its record table.
pub fn decode(
    payload: &[u8],
    num_records: u64,
    decoded_data_size: u64,
    pool: &mut DecompressorPool,
) -> Result<DecodedRecords> {
    if payload.len() < 4 {
        return Err(data_loss("simple chunk payload shorter than its codec id"));
    }
    let codec = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let codec = CompressionType::try_from(codec)?;

    let num_records = usize::try_from(num_records)
        .map_err(|_| data_loss("record count exceeds addressable memory"))?;

    // The stream holds the size table and the records; only the records'
    // total is in the header, so bound the table by its worst case.
    let max_decoded = decoded_data_size
        .checked_add((num_records as u64).saturating_mul(MAX_VARINT_LEN as u64))
        .ok_or_else(|| data_loss("simple chunk decoded size overflows"))?;
    let stream = pool.decompress_with_limit(codec, &payload[4..], max_decoded)?;

    let mut cursor = &stream[..];
    let mut limits = Vec::with_capacity(num_records);
    let mut total = 0usize;
    for _ in 0..num_records {
        let size = read_varint(&mut cursor)
            .map_err(|e| data_loss(format!("bad record size table: {e}")))?;
        let size = usize::try_from(size)
            .map_err(|_| data_loss("record size exceeds addressable memory"))?;
        total = total
            .checked_add(size)
            .ok_or_else(|| data_loss("record sizes overflow"))?;
        limits.push(total);
    }

    if cursor.len() != total {
        return Err(data_loss(format!(
            "record data is {} bytes but size table sums to {}",
            cursor.len(),
            total
        )));
    }
    if total as u64 != decoded_data_size {
        return Err(data_loss(format!(
            "decoded {} bytes, chunk header promised {}",
            total, decoded_data_size
        )));
    }

    Ok(DecodedRecords {
        values: cursor.to_vec(),
        limits,
    })
}

/// Encodes records as a simple chunk payload.
///
/// Returns the payload and the decoded data size for the chunk header.
pub fn encode(records: &[Vec<u8>], codec: CompressionType) -> Result<(Vec<u8>, u64)> {
    let mut stream = Vec::new();
    for record in records {
        push_varint(record.len() as u64, &mut stream);
    }
    for record in records {
        stream.extend_from_slice(record);
    }
    let decoded_data_size: u64 = records.iter().map(|r| r.len() as u64).sum();

    let compressed = compress(codec, &stream)?;
    let mut payload = Vec::with_capacity(4 + compressed.len());
    payload.extend_from_slice(&codec.id().to_le_bytes());
    payload.extend_from_slice(&compressed);
    Ok((payload, decoded_data_size))
}
