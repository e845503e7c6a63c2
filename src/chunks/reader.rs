//! # Chunk Reader
//!
//! Presents chunks as atomic units over a [`ByteSource`], hiding block
//! headers and validating every hash on the way. This is the layer that
//! turns raw bytes into trustworthy `Chunk`s and the layer that knows how
//! to find the next trustworthy chunk after corruption.
//!
//! ## Reading
//!
//! [`read_chunk`](ChunkReader::read_chunk) consumes one chunk: header (its
//! hash checked before anything else is believed), payload (hash checked
//! over exactly `data_size` bytes), alignment padding, and every block
//! header interleaved into the span (each checked against its own hash and
//! against the chunk's extent). On success the position rests on the next
//! chunk's begin.
//!
//! ## Failure States
//!
//! ```text
//! Healthy ── read_chunk ──────────────▶ Healthy
//! Healthy ── hash/framing mismatch ───▶ Failed (find a chunk by scanning)
//! Healthy ── payload hash mismatch ───▶ Failed (skip the known extent)
//! Healthy ── source ends mid-chunk ───▶ Failed (truncated)
//! Failed  ── recover ─────────────────▶ Healthy
//! ```
//!
//! A payload hash mismatch under a valid header keeps the chunk's extent
//! trustworthy, so recovery skips exactly the damaged chunk. Anything that
//! discredits the framing itself falls back to the block scan: advance to
//! each 64 KiB boundary, require a hash-valid block header, follow its
//! next-chunk offset (or the boundary itself when a chunk begins there),
//! and accept the first candidate whose chunk header hash verifies.
//! Truncation recovers to end-of-file, which is a legal terminal state, so
//! a reader over a growing or cut-off file salvages everything before the
//! damage.

use eyre::Result;
use tracing::{debug, warn};

use crate::chunks::block::{
    self, BlockHeader, BLOCK_HEADER_SIZE,
};
use crate::chunks::header::{Chunk, ChunkHeader, CHUNK_HEADER_SIZE};
use crate::error::{failed_precondition, unimplemented, ErrorKind};
use crate::records::position::SkippedRegion;
use crate::source::ByteSource;

#[derive(Debug)]
enum RecoveryPlan {
    /// Header valid, extent known: skip exactly `[begin, end)`.
    SkipChunk { begin: u64, end: u64 },
    /// Framing untrusted: block-scan forward from the damage at `begin`.
    FindChunk { begin: u64 },
}

#[derive(Debug)]
struct Failure {
    kind: ErrorKind,
    message: String,
    plan: RecoveryPlan,
}

enum Probe {
    /// Zero bytes available at a chunk boundary.
    CleanEof,
    /// Some bytes, but fewer than the header span.
    Truncated,
    Invalid(&'static str),
    Valid(ChunkHeader),
}

/// Reads block-framed chunks from a byte source.
pub struct ChunkReader<S> {
    src: S,
    /// Begin of the next chunk to read.
    pos: u64,
    failure: Option<Failure>,
}

impl<S: ByteSource> ChunkReader<S> {
    /// Starts reading at the source's current position, which must be a
    /// chunk boundary (0 for a whole file).
    pub fn new(src: S) -> Self {
        let pos = src.position();
        Self {
            src,
            pos,
            failure: None,
        }
    }

    /// Current position: the begin of the next chunk, or the failure point.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }

    pub fn supports_random_access(&self) -> bool {
        self.src.supports_random_access()
    }

    pub fn size(&mut self) -> Result<u64> {
        self.check_healthy()?;
        self.src.size()
    }

    /// Consumes the underlying source.
    pub fn into_source(self) -> S {
        self.src
    }

    fn check_healthy(&self) -> Result<()> {
        match &self.failure {
            None => Ok(()),
            Some(failure) => Err(failure.kind.to_report(failure.message.clone())),
        }
    }

    fn fail(&mut self, kind: ErrorKind, plan: RecoveryPlan, message: String) -> eyre::Report {
        debug!(?plan, %message, "chunk reader failed");
        let report = kind.to_report(message.clone());
        self.failure = Some(Failure {
            kind,
            message,
            plan,
        });
        report
    }

    /// Moves the source cursor to `target`. Backward motion requires random
    /// access; forward motion on sequential sources reads and discards.
    /// Stops silently at end-of-file.
    fn goto(&mut self, target: u64) -> Result<()> {
        let cur = self.src.position();
        if target == cur {
            return Ok(());
        }
        if self.src.supports_random_access() {
            return self.src.seek(target);
        }
        if target < cur {
            return Err(unimplemented(
                "backward seek on a sequential-only byte source",
            ));
        }
        let mut remaining = target - cur;
        while remaining > 0 {
            let view = self.src.pull(remaining.min(block::BLOCK_SIZE) as usize)?;
            if view.is_empty() {
                return Ok(());
            }
            let n = (view.len() as u64).min(remaining) as usize;
            self.src.advance(n);
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Peeks the chunk header at `chunk_begin` without consuming anything.
    /// The source must already be positioned at `chunk_begin`. Embedded
    /// block headers are checked for hash validity and for pointing back at
    /// `chunk_begin`.
    fn probe_header(&mut self, chunk_begin: u64) -> Result<Probe> {
        let span = block::interleaved_end(chunk_begin, CHUNK_HEADER_SIZE as u64)? - chunk_begin;
        let view = self.src.pull(span as usize)?;
        if view.is_empty() {
            return Ok(Probe::CleanEof);
        }
        if (view.len() as u64) < span {
            return Ok(Probe::Truncated);
        }

        let mut content = [0u8; CHUNK_HEADER_SIZE];
        let mut filled = 0usize;
        let mut off = 0usize;
        let mut cur = chunk_begin;
        while filled < CHUNK_HEADER_SIZE {
            if block::is_block_boundary(cur) {
                match BlockHeader::parse_lenient(&view[off..off + BLOCK_HEADER_SIZE]) {
                    None => return Ok(Probe::Invalid("block header hash mismatch")),
                    Some(header) => {
                        if header.previous_chunk_offset() != cur - chunk_begin {
                            return Ok(Probe::Invalid(
                                "block header does not point back at the chunk begin",
                            ));
                        }
                    }
                }
                off += BLOCK_HEADER_SIZE;
                cur += BLOCK_HEADER_SIZE as u64;
                continue;
            }
            let run = (block::remaining_in_block(cur) as usize).min(CHUNK_HEADER_SIZE - filled);
            content[filled..filled + run].copy_from_slice(&view[off..off + run]);
            filled += run;
            off += run;
            cur += run as u64;
        }

        match ChunkHeader::parse_lenient(&content) {
            None => Ok(Probe::Invalid("chunk header hash mismatch")),
            Some(header) => Ok(Probe::Valid(*header)),
        }
    }

    /// Peeks the next chunk's header without consuming its payload.
    /// `Ok(None)` is clean end-of-file.
    pub fn pull_chunk_header(&mut self) -> Result<Option<ChunkHeader>> {
        self.check_healthy()?;
        let chunk_begin = self.pos;
        self.goto(chunk_begin)?;
        match self.probe_header(chunk_begin)? {
            Probe::CleanEof => Ok(None),
            Probe::Truncated => Err(self.fail(
                ErrorKind::Truncated,
                RecoveryPlan::FindChunk { begin: chunk_begin },
                format!("file ends inside the chunk header at {}", chunk_begin),
            )),
            Probe::Invalid(what) => Err(self.fail(
                ErrorKind::DataLoss,
                RecoveryPlan::FindChunk { begin: chunk_begin },
                format!("{} at {}", what, chunk_begin),
            )),
            Probe::Valid(header) => Ok(Some(header)),
        }
    }

    /// Verifies that the file begins with a valid signature chunk.
    /// `Ok(false)` means the source is empty.
    pub fn check_file_format(&mut self) -> Result<bool> {
        let header = match self.pull_chunk_header()? {
            None => return Ok(false),
            Some(header) => header,
        };
        if self.pos == 0 && !Chunk::is_valid_signature(&header) {
            let report = self.fail(
                ErrorKind::DataLoss,
                RecoveryPlan::FindChunk { begin: 0 },
                "file does not begin with a signature chunk".to_string(),
            );
            return Err(report);
        }
        Ok(true)
    }

    /// Reads the next whole chunk. `Ok(None)` is clean end-of-file.
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        self.check_healthy()?;
        let chunk_begin = self.pos;
        self.goto(chunk_begin)?;

        let header = match self.probe_header(chunk_begin)? {
            Probe::CleanEof => return Ok(None),
            Probe::Truncated => {
                return Err(self.fail(
                    ErrorKind::Truncated,
                    RecoveryPlan::FindChunk { begin: chunk_begin },
                    format!("file ends inside the chunk header at {}", chunk_begin),
                ))
            }
            Probe::Invalid(what) => {
                return Err(self.fail(
                    ErrorKind::DataLoss,
                    RecoveryPlan::FindChunk { begin: chunk_begin },
                    format!("{} at {}", what, chunk_begin),
                ))
            }
            Probe::Valid(header) => header,
        };

        let content_size = header.content_size()?;
        let chunk_end = block::interleaved_end(chunk_begin, content_size)?;
        let data_size = header.data_size();

        // Consume the whole span: header bytes, payload, padding, and the
        // interleaved block headers, validating as we go.
        let payload_begin = CHUNK_HEADER_SIZE as u64;
        let payload_end = payload_begin + data_size;
        let mut payload: Vec<u8> = Vec::new();
        let mut content_off = 0u64;
        let mut cur = chunk_begin;
        while cur < chunk_end {
            if block::is_block_boundary(cur) {
                let view = self.src.pull(BLOCK_HEADER_SIZE)?;
                if view.len() < BLOCK_HEADER_SIZE {
                    return Err(self.fail(
                        ErrorKind::Truncated,
                        RecoveryPlan::FindChunk { begin: chunk_begin },
                        format!("file ends inside a block header at {}", cur),
                    ));
                }
                let valid = BlockHeader::parse_lenient(&view[..BLOCK_HEADER_SIZE])
                    .is_some_and(|h| {
                        h.previous_chunk_offset() == cur - chunk_begin
                            && h.next_chunk_offset() == chunk_end - cur
                    });
                if !valid {
                    return Err(self.fail(
                        ErrorKind::DataLoss,
                        RecoveryPlan::FindChunk { begin: chunk_begin },
                        format!("block header at {} disagrees with the chunk extent", cur),
                    ));
                }
                self.src.advance(BLOCK_HEADER_SIZE);
                cur += BLOCK_HEADER_SIZE as u64;
                continue;
            }

            let until = block::remaining_in_block(cur).min(chunk_end - cur);
            let view = self.src.pull(until as usize)?;
            let n = (view.len() as u64).min(until) as usize;
            if n == 0 {
                return Err(self.fail(
                    ErrorKind::Truncated,
                    RecoveryPlan::FindChunk { begin: chunk_begin },
                    format!(
                        "file ends {} content bytes into the chunk at {}",
                        content_off, chunk_begin
                    ),
                ));
            }

            // Keep the payload region; header bytes and padding are skipped.
            let run_begin = content_off;
            let run_end = content_off + n as u64;
            let keep_begin = run_begin.max(payload_begin);
            let keep_end = run_end.min(payload_end);
            if keep_begin < keep_end {
                payload.extend_from_slice(
                    &view[(keep_begin - run_begin) as usize..(keep_end - run_begin) as usize],
                );
            }

            self.src.advance(n);
            cur += n as u64;
            content_off += n as u64;
        }

        if header.verify_data(&payload).is_err() {
            // The header was trustworthy, so the extent is known precisely:
            // recovery can skip this chunk and nothing else.
            return Err(self.fail(
                ErrorKind::DataLoss,
                RecoveryPlan::SkipChunk {
                    begin: chunk_begin,
                    end: chunk_end,
                },
                format!("chunk payload hash mismatch in the chunk at {}", chunk_begin),
            ));
        }

        self.pos = chunk_end;
        Ok(Some(Chunk {
            header,
            data: payload,
        }))
    }

    /// Random access to an exact chunk boundary. The target is trusted; the
    /// next read validates it.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.check_healthy()?;
        self.goto(pos)?;
        self.pos = pos;
        Ok(())
    }

    /// Positions at the chunk whose span contains `pos`, consulting block
    /// headers to find the preceding chunk begin.
    pub fn seek_to_chunk_containing(&mut self, pos: u64) -> Result<()> {
        self.check_healthy()?;

        let mut begin = if pos < block::BLOCK_SIZE {
            0
        } else {
            let boundary = block::block_begin(pos);
            self.goto(boundary)?;
            let view = self.src.pull(BLOCK_HEADER_SIZE)?;
            if view.is_empty() {
                // The target lies at or past the end of file.
                self.pos = self.src.position();
                return Ok(());
            }
            if view.len() < BLOCK_HEADER_SIZE {
                return Err(self.fail(
                    ErrorKind::Truncated,
                    RecoveryPlan::FindChunk { begin: boundary },
                    format!("file ends inside the block header at {}", boundary),
                ));
            }
            let header = match BlockHeader::parse_lenient(&view[..BLOCK_HEADER_SIZE]) {
                Some(header) if header.previous_chunk_offset() <= boundary => *header,
                _ => {
                    return Err(self.fail(
                        ErrorKind::DataLoss,
                        RecoveryPlan::FindChunk { begin: boundary },
                        format!("block header hash mismatch at {}", boundary),
                    ))
                }
            };
            boundary - header.previous_chunk_offset()
        };

        // Hop chunk headers forward until the span containing `pos`.
        loop {
            self.goto(begin)?;
            let header = match self.probe_header(begin)? {
                Probe::CleanEof => {
                    self.pos = self.src.position();
                    return Ok(());
                }
                Probe::Truncated => {
                    return Err(self.fail(
                        ErrorKind::Truncated,
                        RecoveryPlan::FindChunk { begin },
                        format!("file ends inside the chunk header at {}", begin),
                    ))
                }
                Probe::Invalid(what) => {
                    return Err(self.fail(
                        ErrorKind::DataLoss,
                        RecoveryPlan::FindChunk { begin },
                        format!("{} at {}", what, begin),
                    ))
                }
                Probe::Valid(header) => header,
            };
            let end = block::interleaved_end(begin, header.content_size()?)?;
            if pos < end {
                self.pos = begin;
                return Ok(());
            }
            begin = end;
        }
    }

    /// Restores health after a failure by advancing past the damage.
    /// Reports the bridged region. End-of-file is a legal terminal state:
    /// a truncated tail recovers to a region ending at the file's end.
    pub fn recover(&mut self) -> Result<SkippedRegion> {
        let failure = match self.failure.take() {
            Some(failure) => failure,
            None => {
                return Err(failed_precondition(
                    "chunk reader is healthy, nothing to recover",
                ))
            }
        };

        let region = match failure.plan {
            RecoveryPlan::SkipChunk { begin, end } => {
                self.goto(end)?;
                self.pos = end;
                SkippedRegion::new(begin, end, failure.message)
            }
            RecoveryPlan::FindChunk { begin } => {
                let mut scan = block::next_block_begin(self.src.position().max(begin))?;
                loop {
                    self.goto(scan)?;
                    let view = self.src.pull(BLOCK_HEADER_SIZE)?;
                    if view.len() < BLOCK_HEADER_SIZE {
                        // End of file: terminal, not further damage.
                        let n = view.len();
                        self.src.advance(n);
                        let eof = self.src.position();
                        self.pos = eof;
                        break SkippedRegion::new(begin.min(eof), eof, failure.message);
                    }

                    let candidate = BlockHeader::parse_lenient(&view[..BLOCK_HEADER_SIZE])
                        .and_then(|header| {
                            let prev = header.previous_chunk_offset();
                            if prev == 0 {
                                // A chunk begins exactly at this boundary.
                                Some(scan)
                            } else if prev <= scan {
                                scan.checked_add(header.next_chunk_offset())
                            } else {
                                None
                            }
                        });

                    if let Some(candidate) = candidate.filter(|&c| c >= scan) {
                        self.goto(candidate)?;
                        if let Probe::Valid(_) = self.probe_header(candidate)? {
                            self.pos = candidate;
                            break SkippedRegion::new(begin, candidate, failure.message);
                        }
                    }

                    scan = block::next_block_begin(self.src.position().max(scan))?;
                }
            }
        };

        warn!(
            begin = region.begin(),
            end = region.end(),
            reason = region.reason(),
            "skipped a damaged region"
        );
        Ok(region)
    }
}

impl<S> std::fmt::Debug for ChunkReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("pos", &self.pos)
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
