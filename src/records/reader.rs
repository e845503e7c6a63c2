//! # Record Reader
//!
//! The user-facing state machine over the chunk reader and the chunk
//! decoder: iterates records in file order, seeks by record or byte
//! position, reads file metadata, and coordinates recovery across both
//! lower layers.
//!
//! ## Reading
//!
//! The fast path of [`read_record`](RecordReader::read_record) pops the
//! next record from the current chunk's decoder. When the chunk is
//! exhausted the reader loads the next chunk; when a layer fails, the
//! reader records which layer (`recoverable`) and surfaces the error.
//! `Ok(None)` always means clean end-of-file with the reader healthy.
//!
//! ## Recovery
//!
//! After a data-loss or truncation error, [`recover`](RecordReader::recover)
//! bridges the damage and reports the [`SkippedRegion`]. With a recovery
//! callback installed the reader recovers by itself mid-read and consults
//! the callback per region: return `true` to continue, `false` to re-fail.
//! One code path serves both "abort on first corruption" and "best-effort
//! salvage".
//!
//! ```ignore
//! let src = MmapSource::open("events.rec")?;
//! let mut reader = RecordReader::new(src);
//! reader.set_recovery_callback(|region| {
//!     eprintln!("skipped {region}");
//!     true
//! });
//! while let Some(record) = reader.read_record()? {
//!     handle(record);
//! }
//! ```
//!
//! ## Positions
//!
//! [`pos`](RecordReader::pos) is `(chunk_begin, record_index)`; its numeric
//! collapse `chunk_begin + record_index` is what
//! [`seek_to_byte`](RecordReader::seek_to_byte) interprets. Keys returned
//! by [`read_record_at`](RecordReader::read_record_at) are monotonically
//! non-decreasing between seeks.
//!
//! ## Thread Safety
//!
//! A reader is strictly single-threaded; it exclusively owns its source.

use eyre::Result;
use prost::Message;
use tracing::debug;

use crate::chunks::header::ChunkType;
use crate::chunks::reader::ChunkReader;
use crate::encoding::chunk_decoder::ChunkDecoder;
use crate::encoding::projection::FieldProjection;
use crate::error::{data_loss, failed_precondition, split_report, ErrorKind};
use crate::records::metadata::RecordsMetadata;
use crate::records::position::{RecordPosition, SkippedRegion};
use crate::source::ByteSource;

/// Which layer a failed reader can recover at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverable {
    No,
    ChunkReader,
    ChunkDecoder,
}

type RecoveryCallback = Box<dyn FnMut(&SkippedRegion) -> bool>;

/// Construction options for a [`RecordReader`].
#[derive(Default)]
pub struct ReaderOptions {
    field_projection: FieldProjection,
    recovery: Option<RecoveryCallback>,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts which fields transposed chunks decode. Simple chunks are
    /// unaffected.
    pub fn field_projection(mut self, projection: FieldProjection) -> Self {
        self.field_projection = projection;
        self
    }

    /// Installs a recovery callback: damaged regions are skipped
    /// automatically and reported to it; returning `false` re-fails.
    pub fn recovery(mut self, callback: impl FnMut(&SkippedRegion) -> bool + 'static) -> Self {
        self.recovery = Some(Box::new(callback));
        self
    }
}

#[derive(Debug, Clone)]
struct ReaderFailure {
    kind: ErrorKind,
    message: String,
    recoverable: Recoverable,
}

/// Reads records from a block-framed record file.
pub struct RecordReader<S> {
    chunk_reader: ChunkReader<S>,
    /// Begin of the chunk the decoder holds (or is about to hold).
    chunk_begin: u64,
    decoder: ChunkDecoder,
    failure: Option<ReaderFailure>,
    recovery: Option<RecoveryCallback>,
}

impl<S: ByteSource> RecordReader<S> {
    /// Opens a reader over `src` with default options.
    pub fn new(src: S) -> Self {
        Self::with_options(src, ReaderOptions::new())
    }

    pub fn with_options(src: S, options: ReaderOptions) -> Self {
        let chunk_reader = ChunkReader::new(src);
        let chunk_begin = chunk_reader.pos();
        Self {
            chunk_reader,
            chunk_begin,
            decoder: ChunkDecoder::new(options.field_projection),
            failure: None,
            recovery: options.recovery,
        }
    }

    /// Current logical position: the next record's position.
    pub fn pos(&self) -> RecordPosition {
        RecordPosition::new(self.chunk_begin, self.decoder.index())
    }

    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }

    /// Which layer the current failure recovers at; `No` when healthy.
    pub fn recoverable(&self) -> Recoverable {
        match &self.failure {
            Some(failure) => failure.recoverable,
            None => Recoverable::No,
        }
    }

    pub fn supports_random_access(&self) -> bool {
        self.chunk_reader.supports_random_access()
    }

    /// Size of the underlying source in bytes.
    pub fn size(&mut self) -> Result<u64> {
        if self.failure.is_some() {
            return Err(self.refail());
        }
        self.chunk_reader.size()
    }

    /// Installs or replaces the recovery callback.
    pub fn set_recovery_callback(
        &mut self,
        callback: impl FnMut(&SkippedRegion) -> bool + 'static,
    ) {
        self.recovery = Some(Box::new(callback));
    }

    pub fn clear_recovery_callback(&mut self) {
        self.recovery = None;
    }

    /// Returns the underlying source.
    pub fn into_source(self) -> S {
        self.chunk_reader.into_source()
    }

    /// Verifies the file begins with a valid signature chunk. `Ok(false)`
    /// means the source is empty.
    pub fn check_file_format(&mut self) -> Result<bool> {
        if self.failure.is_some() {
            return Err(self.refail());
        }
        if self.decoder.index() < self.decoder.num_records() {
            return Ok(true);
        }
        match self.chunk_reader.check_file_format() {
            Ok(ok) => Ok(ok),
            Err(report) => {
                self.decoder.clear();
                Err(self.fail(Recoverable::ChunkReader, report))
            }
        }
    }

    /// Reads the file metadata. Must be called at the beginning of the
    /// file; a file without a metadata chunk yields the default.
    pub fn read_metadata(&mut self) -> Result<RecordsMetadata> {
        let serialized = match self.read_serialized_metadata()? {
            None => return Ok(RecordsMetadata::default()),
            Some(serialized) => serialized,
        };
        match RecordsMetadata::decode(&serialized[..]) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                let report = data_loss(format!("file metadata does not parse: {e}"));
                Err(self.fail(Recoverable::No, report))
            }
        }
    }

    /// Reads the serialized metadata message without parsing it.
    /// `Ok(None)` means the file carries no metadata chunk (or recovery
    /// skipped a damaged one).
    pub fn read_serialized_metadata(&mut self) -> Result<Option<Vec<u8>>> {
        if self.failure.is_some() && !self.try_recovery() {
            return Err(self.refail());
        }
        if self.chunk_reader.pos() != 0 {
            let report = failed_precondition(
                "read_metadata must be called at the beginning of the file",
            );
            return Err(self.fail(Recoverable::No, report));
        }

        self.chunk_begin = 0;
        let signature = match self.chunk_reader.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(None),
            Err(report) => {
                let report = self.fail(Recoverable::ChunkReader, report);
                if self.try_recovery() {
                    return Ok(None);
                }
                return Err(report);
            }
        };
        if signature.header.chunk_type_raw() != ChunkType::FileSignature as u8 {
            let report = data_loss(format!(
                "unexpected type of the first chunk: 0x{:02x}",
                signature.header.chunk_type_raw()
            ));
            return Err(self.fail(Recoverable::No, report));
        }

        self.chunk_begin = self.chunk_reader.pos();
        let header = match self.chunk_reader.pull_chunk_header() {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(report) => {
                let report = self.fail(Recoverable::ChunkReader, report);
                if self.try_recovery() {
                    return Ok(None);
                }
                return Err(report);
            }
        };
        if header.chunk_type_raw() != ChunkType::FileMetadata as u8 {
            // No metadata chunk; assume empty metadata.
            return Ok(None);
        }

        let chunk = match self.chunk_reader.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(None),
            Err(report) => {
                let report = self.fail(Recoverable::ChunkReader, report);
                if self.try_recovery() {
                    return Ok(None);
                }
                return Err(report);
            }
        };
        match self.decoder.decode_metadata(&chunk) {
            Ok(serialized) => Ok(Some(serialized)),
            Err(report) => {
                let report = self.fail(Recoverable::ChunkDecoder, report);
                if self.try_recovery() {
                    return Ok(None);
                }
                Err(report)
            }
        }
    }

    /// Returns the next record, or `None` at clean end-of-file.
    pub fn read_record(&mut self) -> Result<Option<&[u8]>> {
        if !self.advance()? {
            return Ok(None);
        }
        Ok(Some(self.decoder.current()))
    }

    /// Returns the next record together with its position.
    pub fn read_record_at(&mut self) -> Result<Option<(RecordPosition, &[u8])>> {
        if !self.advance()? {
            return Ok(None);
        }
        let key = RecordPosition::new(self.chunk_begin, self.decoder.index() - 1);
        Ok(Some((key, self.decoder.current())))
    }

    /// Returns the next record parsed as a message. A record that does not
    /// parse is a data-loss error recoverable at the decoder level; with a
    /// recovery callback installed the bad record is skipped and reading
    /// continues.
    pub fn read_message<M: Message + Default>(&mut self) -> Result<Option<M>> {
        loop {
            if !self.advance()? {
                return Ok(None);
            }
            match M::decode(self.decoder.current()) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    let message = format!("record does not parse as a message: {e}");
                    self.decoder.mark_record_unparsable(message.clone());
                    let report = self.fail(Recoverable::ChunkDecoder, data_loss(message));
                    if !self.try_recovery() {
                        return Err(report);
                    }
                }
            }
        }
    }

    /// Seeks to a record position obtained from `read_record_at` or `pos`.
    pub fn seek(&mut self, target: RecordPosition) -> Result<()> {
        if self.failure.is_some() && !self.try_recovery() {
            return Err(self.refail());
        }
        if target.chunk_begin() == self.chunk_begin {
            if target.record_index() != 0 && self.chunk_reader.pos() <= self.chunk_begin {
                // Records wanted from a chunk that is located but not read.
                match self.read_chunk() {
                    Ok(_) => {}
                    Err(report) => {
                        if !self.try_recovery() {
                            return Err(report);
                        }
                        return Ok(());
                    }
                }
            }
            // Seeking to the beginning of a chunk does not need reading the
            // chunk, which matters when it is past the end of file.
        } else {
            if let Err(report) = self.chunk_reader.seek(target.chunk_begin()) {
                self.chunk_begin = self.chunk_reader.pos();
                self.decoder.clear();
                let report = self.fail(Recoverable::ChunkReader, report);
                if !self.try_recovery() {
                    return Err(report);
                }
                return Ok(());
            }
            self.chunk_begin = target.chunk_begin();
            if target.record_index() == 0 {
                self.decoder.clear();
                return Ok(());
            }
            match self.read_chunk() {
                Ok(_) => {}
                Err(report) => {
                    if !self.try_recovery() {
                        return Err(report);
                    }
                    return Ok(());
                }
            }
        }
        self.decoder.set_index(target.record_index());
        Ok(())
    }

    /// Seeks to a byte position, interpreting `pos - chunk_begin` as the
    /// record index within the chunk containing `pos`.
    pub fn seek_to_byte(&mut self, target: u64) -> Result<()> {
        if self.failure.is_some() && !self.try_recovery() {
            return Err(self.refail());
        }
        if target < self.chunk_begin || target > self.chunk_reader.pos() {
            if let Err(report) = self.chunk_reader.seek_to_chunk_containing(target) {
                self.chunk_begin = self.chunk_reader.pos();
                self.decoder.clear();
                let report = self.fail(Recoverable::ChunkReader, report);
                if !self.try_recovery() {
                    return Err(report);
                }
                return Ok(());
            }
            self.chunk_begin = self.chunk_reader.pos();
            if self.chunk_begin >= target {
                // `target` falls at the chunk begin, or after all records
                // of the previous chunk. Stop at the chunk start unread.
                self.decoder.clear();
                return Ok(());
            }
            match self.read_chunk() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(report) => {
                    if !self.try_recovery() {
                        return Err(report);
                    }
                    return Ok(());
                }
            }
        }
        self.decoder.set_index(target - self.chunk_begin);
        Ok(())
    }

    /// Explicit recovery after a failed operation. Valid only when
    /// [`recoverable`](Self::recoverable) is not `No`; restores health and
    /// reports the bridged region.
    pub fn recover(&mut self) -> Result<SkippedRegion> {
        let failure = match self.failure.take() {
            Some(failure) => failure,
            None => {
                return Err(failed_precondition(
                    "record reader is healthy, nothing to recover",
                ))
            }
        };
        match failure.recoverable {
            Recoverable::No => {
                let message = failure.message.clone();
                self.failure = Some(failure);
                Err(failed_precondition(format!(
                    "failure is not recoverable: {message}"
                )))
            }
            Recoverable::ChunkReader => match self.chunk_reader.recover() {
                Ok(region) => {
                    self.chunk_begin = self.chunk_reader.pos();
                    self.decoder.clear();
                    Ok(region)
                }
                Err(report) => {
                    let (kind, message) = split_report(&report);
                    self.failure = Some(ReaderFailure {
                        kind,
                        message,
                        recoverable: Recoverable::No,
                    });
                    Err(report)
                }
            },
            Recoverable::ChunkDecoder => {
                let index_before = self.decoder.index();
                if self.decoder.recover() {
                    // The unparsable record was stepped over.
                    Ok(SkippedRegion::new(
                        self.chunk_begin + index_before,
                        self.chunk_begin + self.decoder.index(),
                        failure.message,
                    ))
                } else {
                    // The rest of the chunk is unusable; the chunk reader
                    // is already past it.
                    self.decoder.clear();
                    Ok(SkippedRegion::new(
                        self.chunk_begin + index_before,
                        self.chunk_reader.pos(),
                        failure.message,
                    ))
                }
            }
        }
    }

    /// Fast/slow read loop. `Ok(true)` leaves the just-read record in the
    /// decoder's cursor; `Ok(false)` is clean end-of-file.
    fn advance(&mut self) -> Result<bool> {
        if self.failure.is_some() && !self.try_recovery() {
            return Err(self.refail());
        }
        loop {
            if self.decoder.advance_record() {
                return Ok(true);
            }
            if self.decoder.is_failed() {
                let report = match self.decoder.failure() {
                    Some(report) => report,
                    None => data_loss("chunk decoder failed"),
                };
                let report = self.fail(Recoverable::ChunkDecoder, report);
                if !self.try_recovery() {
                    return Err(report);
                }
                continue;
            }
            match self.read_chunk() {
                Ok(true) => continue,
                Ok(false) => return Ok(false),
                Err(report) => {
                    if !self.try_recovery() {
                        return Err(report);
                    }
                }
            }
        }
    }

    /// Loads and decodes the next chunk. `Ok(false)` is clean end-of-file.
    fn read_chunk(&mut self) -> Result<bool> {
        self.chunk_begin = self.chunk_reader.pos();
        let chunk = match self.chunk_reader.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.decoder.clear();
                return Ok(false);
            }
            Err(report) => {
                self.decoder.clear();
                return Err(self.fail(Recoverable::ChunkReader, report));
            }
        };
        if let Err(report) = self.decoder.decode(&chunk) {
            return Err(self.fail(Recoverable::ChunkDecoder, report));
        }
        Ok(true)
    }

    /// Records a failure and hands the report back for propagation.
    fn fail(&mut self, recoverable: Recoverable, report: eyre::Report) -> eyre::Report {
        let (kind, message) = split_report(&report);
        debug!(?recoverable, %message, "record reader failed");
        self.failure = Some(ReaderFailure {
            kind,
            message,
            recoverable,
        });
        report
    }

    /// Re-raises the stored failure.
    fn refail(&mut self) -> eyre::Report {
        match &self.failure {
            Some(failure) => failure.kind.to_report(failure.message.clone()),
            None => failed_precondition("no failure to re-raise"),
        }
    }

    /// Callback-driven recovery. `true` means recovered and accepted:
    /// the caller should retry.
    fn try_recovery(&mut self) -> bool {
        if self.recovery.is_none() {
            return false;
        }
        let saved = self.failure.clone();
        let region = match self.recover() {
            Ok(region) => region,
            Err(_) => return false,
        };
        let mut callback = match self.recovery.take() {
            Some(callback) => callback,
            None => return false,
        };
        let accept = callback(&region);
        self.recovery = Some(callback);
        if !accept {
            // Re-fail with the original message; the recovery itself is
            // spent.
            self.failure = saved.map(|failure| ReaderFailure {
                recoverable: Recoverable::No,
                ..failure
            });
        }
        accept
    }
}

impl<S> std::fmt::Debug for RecordReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("chunk_begin", &self.chunk_begin)
            .field("decoder", &self.decoder)
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
