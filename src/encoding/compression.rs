//! # Chunk Compression
//!
//! Simple and transposed payloads carry a `u32` compression id followed by
//! one or more compressed streams. Four codecs are defined by the format:
//!
//! | Id | Codec |
//! |------|---------|
//! | `0` | none |
//! | `'b'` (0x62) | brotli |
//! | `'z'` (0x7a) | zstd |
//! | `'s'` (0x73) | snappy |
//!
//! Any other id is a data-loss error.
//!
//! ## Decompressor Reuse
//!
//! zstd and snappy decompression contexts are expensive to set up, so the
//! chunk decoder owns a [`DecompressorPool`]: a bounded LIFO of idle
//! contexts per codec. A context is acquired for one stream and returned
//! afterwards; the pool never holds more than [`POOL_LIMIT`] contexts per
//! codec. Context allocation failure is an `Internal` error, not data loss.
//!
//! ## Size Discipline
//!
//! Every compressed stream in the format records its decoded size, and
//! [`DecompressorPool::decompress`] refuses output that does not match it
//! exactly. This bounds allocations before any bytes are trusted and turns
//! "wrong size" corruption into a clean `DataLoss` instead of an OOM.

use eyre::Result;

use crate::error::{data_loss, internal};

/// Idle contexts kept per codec.
pub const POOL_LIMIT: usize = 4;

/// zstd level used by the encoders. Matches the codec's own default.
const ZSTD_LEVEL: i32 = 3;
/// brotli quality used by the encoders.
const BROTLI_QUALITY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompressionType {
    None = 0,
    Brotli = b'b' as u32,
    Zstd = b'z' as u32,
    Snappy = b's' as u32,
}

impl TryFrom<u32> for CompressionType {
    type Error = eyre::Report;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            v if v == b'b' as u32 => Ok(CompressionType::Brotli),
            v if v == b'z' as u32 => Ok(CompressionType::Zstd),
            v if v == b's' as u32 => Ok(CompressionType::Snappy),
            v => Err(data_loss(format!("unknown compression type: {}", v))),
        }
    }
}

impl CompressionType {
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Bounded LIFO reuse of decompression contexts, owned by the chunk decoder.
pub struct DecompressorPool {
    zstd: Vec<zstd::bulk::Decompressor<'static>>,
    snappy: Vec<snap::raw::Decoder>,
}

impl std::fmt::Debug for DecompressorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressorPool")
            .field("zstd_idle", &self.zstd.len())
            .field("snappy_idle", &self.snappy.len())
            .finish()
    }
}

impl Default for DecompressorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DecompressorPool {
    pub fn new() -> Self {
        Self {
            zstd: Vec::new(),
            snappy: Vec::new(),
        }
    }

    /// Decompresses `input` to exactly `decoded_size` bytes.
    pub fn decompress(
        &mut self,
        codec: CompressionType,
        input: &[u8],
        decoded_size: u64,
    ) -> Result<Vec<u8>> {
        let output = self.decompress_with_limit(codec, input, decoded_size)?;
        if output.len() as u64 != decoded_size {
            return Err(data_loss(format!(
                "stream decompressed to {} bytes, expected {}",
                output.len(),
                decoded_size
            )));
        }
        Ok(output)
    }

    /// Decompresses `input` to at most `max_decoded` bytes. Used where the
    /// exact decoded size is not recorded separately from the stream.
    pub fn decompress_with_limit(
        &mut self,
        codec: CompressionType,
        input: &[u8],
        max_decoded: u64,
    ) -> Result<Vec<u8>> {
        let max_decoded = usize::try_from(max_decoded)
            .map_err(|_| data_loss("decoded size exceeds addressable memory"))?;
        let output = match codec {
            CompressionType::None => input.to_vec(),
            CompressionType::Zstd => {
                let mut ctx = match self.zstd.pop() {
                    Some(ctx) => ctx,
                    None => zstd::bulk::Decompressor::new()
                        .map_err(|e| internal(format!("zstd context allocation failed: {e}")))?,
                };
                let result = ctx
                    .decompress(input, max_decoded)
                    .map_err(|e| data_loss(format!("zstd decompression failed: {e}")));
                if self.zstd.len() < POOL_LIMIT {
                    self.zstd.push(ctx);
                }
                result?
            }
            CompressionType::Snappy => {
                let mut ctx = match self.snappy.pop() {
                    Some(ctx) => ctx,
                    None => snap::raw::Decoder::new(),
                };
                let result = ctx
                    .decompress_vec(input)
                    .map_err(|e| data_loss(format!("snappy decompression failed: {e}")));
                if self.snappy.len() < POOL_LIMIT {
                    self.snappy.push(ctx);
                }
                result?
            }
            CompressionType::Brotli => {
                let mut output = Vec::new();
                let mut cursor = input;
                brotli::BrotliDecompress(&mut cursor, &mut output)
                    .map_err(|e| data_loss(format!("brotli decompression failed: {e}")))?;
                output
            }
        };

        if output.len() > max_decoded {
            return Err(data_loss(format!(
                "stream decompressed to {} bytes, limit was {}",
                output.len(),
                max_decoded
            )));
        }
        Ok(output)
    }

    #[cfg(test)]
    fn idle_zstd(&self) -> usize {
        self.zstd.len()
    }
}

/// Compresses `input` with `codec`. Used by the writer side.
pub fn compress(codec: CompressionType, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(input.to_vec()),
        CompressionType::Zstd => zstd::bulk::compress(input, ZSTD_LEVEL)
            .map_err(|e| internal(format!("zstd compression failed: {e}"))),
        CompressionType::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            encoder
                .compress_vec(input)
                .map_err(|e| internal(format!("snappy compression failed: {e}")))
        }
        CompressionType::Brotli => {
            let mut output = Vec::new();
            let params = brotli::enc::BrotliEncoderParams {
                quality: BROTLI_QUALITY as i32,
                ..Default::default()
            };
            let mut cursor = input;
            brotli::BrotliCompress(&mut cursor, &mut output, &params)
                .map_err(|e| internal(format!("brotli compression failed: {e}")))?;
            Ok(output)
        }
    }
}
