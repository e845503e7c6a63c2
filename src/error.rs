//! # Error Kinds
//!
//! recfile plumbs failures through `eyre::Result` like the rest of the crate's
//! internals, but every failure produced by the format layers carries a typed
//! [`ReadError`] so callers (and the reader's own recovery machinery) can tell
//! corruption apart from misuse.
//!
//! ## Kinds
//!
//! | Kind | Meaning | Recoverable |
//! |------|---------|-------------|
//! | `DataLoss` | Hash mismatch, unknown chunk type, inconsistent size table, decompression failure, unparsable message | yes |
//! | `Truncated` | The source hit end-of-file in the middle of a chunk | yes |
//! | `Unimplemented` | Random-access operation on a sequential-only source | no |
//! | `FailedPrecondition` | Operation called in the wrong state (e.g. metadata read away from position 0) | no |
//! | `Internal` | Decompressor context allocation failure and similar environment errors | no |
//! | `Overflow` | A position computation would exceed the u64 range | no |
//!
//! `DataLoss` and `Truncated` put the detecting layer into a failed-but-
//! recoverable state; the remaining kinds are terminal unless the caller
//! changes what it is doing.
//!
//! ## Classification
//!
//! [`ReadError::kind_of`] recovers the kind from any `eyre::Report` produced
//! by this crate. Reports raised by foreign code (io errors wrapped by a
//! source, for example) classify as `Internal`.

use thiserror::Error;

/// A failure produced by the record-file layers.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("data loss: {0}")]
    DataLoss(String),
    #[error("truncated file: {0}")]
    Truncated(String),
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("position overflow: {0}")]
    Overflow(String),
}

/// The kind of a [`ReadError`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataLoss,
    Truncated,
    Unimplemented,
    FailedPrecondition,
    Internal,
    Overflow,
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::DataLoss(_) => ErrorKind::DataLoss,
            ReadError::Truncated(_) => ErrorKind::Truncated,
            ReadError::Unimplemented(_) => ErrorKind::Unimplemented,
            ReadError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            ReadError::Internal(_) => ErrorKind::Internal,
            ReadError::Overflow(_) => ErrorKind::Overflow,
        }
    }

    /// The message without its kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ReadError::DataLoss(m)
            | ReadError::Truncated(m)
            | ReadError::Unimplemented(m)
            | ReadError::FailedPrecondition(m)
            | ReadError::Internal(m)
            | ReadError::Overflow(m) => m,
        }
    }

    /// Classifies an `eyre::Report`. Reports not raised by this crate are
    /// treated as `Internal`.
    pub fn kind_of(report: &eyre::Report) -> ErrorKind {
        match report.downcast_ref::<ReadError>() {
            Some(err) => err.kind(),
            None => ErrorKind::Internal,
        }
    }
}

/// Kind and bare message of a report, for storing a failure that can be
/// re-raised later.
pub(crate) fn split_report(report: &eyre::Report) -> (ErrorKind, String) {
    match report.downcast_ref::<ReadError>() {
        Some(err) => (err.kind(), err.message().to_string()),
        None => (ErrorKind::Internal, report.to_string()),
    }
}

impl ErrorKind {
    /// Whether failures of this kind leave a layer in a recoverable state.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::DataLoss | ErrorKind::Truncated)
    }

    /// Rebuilds a report of this kind from a saved message.
    pub(crate) fn to_report(self, message: impl Into<String>) -> eyre::Report {
        let message = message.into();
        let err = match self {
            ErrorKind::DataLoss => ReadError::DataLoss(message),
            ErrorKind::Truncated => ReadError::Truncated(message),
            ErrorKind::Unimplemented => ReadError::Unimplemented(message),
            ErrorKind::FailedPrecondition => ReadError::FailedPrecondition(message),
            ErrorKind::Internal => ReadError::Internal(message),
            ErrorKind::Overflow => ReadError::Overflow(message),
        };
        eyre::Report::new(err)
    }
}

pub(crate) fn data_loss(message: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReadError::DataLoss(message.into()))
}

pub(crate) fn unimplemented(message: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReadError::Unimplemented(message.into()))
}

pub(crate) fn failed_precondition(message: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReadError::FailedPrecondition(message.into()))
}

pub(crate) fn internal(message: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReadError::Internal(message.into()))
}

pub(crate) fn overflow(message: impl Into<String>) -> eyre::Report {
    eyre::Report::new(ReadError::Overflow(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(ReadError::DataLoss("x".into()).kind(), ErrorKind::DataLoss);
        assert_eq!(
            ReadError::Truncated("x".into()).kind(),
            ErrorKind::Truncated
        );
        assert_eq!(
            ReadError::FailedPrecondition("x".into()).kind(),
            ErrorKind::FailedPrecondition
        );
    }

    #[test]
    fn kind_of_classifies_crate_errors() {
        let report = data_loss("chunk header hash mismatch");
        assert_eq!(ReadError::kind_of(&report), ErrorKind::DataLoss);

        let report = unimplemented("seek on sequential source");
        assert_eq!(ReadError::kind_of(&report), ErrorKind::Unimplemented);
    }

    #[test]
    fn kind_of_foreign_errors_is_internal() {
        let report = eyre::eyre!("some unrelated failure");
        assert_eq!(ReadError::kind_of(&report), ErrorKind::Internal);
    }

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::DataLoss.is_recoverable());
        assert!(ErrorKind::Truncated.is_recoverable());
        assert!(!ErrorKind::Unimplemented.is_recoverable());
        assert!(!ErrorKind::FailedPrecondition.is_recoverable());
        assert!(!ErrorKind::Internal.is_recoverable());
        assert!(!ErrorKind::Overflow.is_recoverable());
    }

    #[test]
    fn to_report_round_trips_kind_and_message() {
        let report = ErrorKind::DataLoss.to_report("payload hash mismatch");
        assert_eq!(ReadError::kind_of(&report), ErrorKind::DataLoss);
        assert!(report.to_string().contains("payload hash mismatch"));
    }
}
