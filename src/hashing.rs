//! # Content Hashing
//!
//! The file format protects every header and payload with a fixed
//! non-cryptographic 64-bit hash. The algorithm is part of the on-disk
//! format: files are portable because every implementation computes the same
//! xxh3-64 digest (seedless) over the same designated byte ranges.
//!
//! Hashed ranges:
//!
//! - block header: the 16 bytes following `header_hash`
//! - chunk header: the first 32 bytes (everything but `header_hash`)
//! - chunk payload: exactly `data_size` bytes (padding excluded)
//! - transposed sub-streams: each compressed bucket and the transition stream

use xxhash_rust::xxh3::xxh3_64;

/// The format's 64-bit content hash.
#[inline]
pub fn content_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}
