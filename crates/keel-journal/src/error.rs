//! Journal error types.
//!
//! This module defines all error types surfaced by the journal.

use std::io;

use thiserror::Error;

use keel_common::types::{Asqn, SegmentId};

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// I/O error during journal operations.
    #[error("journal I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A record was appended with a non-sequential or already-used index.
    #[error("invalid record index {index}: {reason}")]
    InvalidIndex {
        /// The offending record index.
        index: u64,
        /// Why the index was rejected.
        reason: String,
    },

    /// A record was appended with a non-increasing application sequence number.
    #[error("invalid asqn {asqn}: last specified asqn is {last}")]
    InvalidAsqn {
        /// The offending sequence number.
        asqn: Asqn,
        /// The sequence number of the last record that carried one.
        last: Asqn,
    },

    /// A supplied record's checksum does not match its payload.
    #[error(
        "record checksum mismatch at index {index}: expected {expected:#010x}, computed {computed:#010x}"
    )]
    InvalidChecksum {
        /// Index of the offending record.
        index: u64,
        /// Checksum carried by the record.
        expected: u32,
        /// Checksum recomputed over the record body.
        computed: u32,
    },

    /// A record body exceeds the configured maximum entry size.
    #[error("record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Size of the rejected record body.
        size: usize,
        /// Configured maximum body size.
        max: usize,
    },

    /// The active segment has no room for the requested frame.
    #[error("segment {segment_id} is full: {needed} bytes requested, {remaining} remaining")]
    SegmentFull {
        /// Identifier of the full segment.
        segment_id: SegmentId,
        /// Bytes the frame would have occupied.
        needed: usize,
        /// Bytes left before the segment size cap.
        remaining: u64,
    },

    /// A frame inside the committed region of a segment failed validation.
    #[error("corrupted frame at index {index} in segment {segment_id}: {reason}")]
    CorruptedFrame {
        /// Identifier of the segment holding the frame.
        segment_id: SegmentId,
        /// Index the frame was expected to carry.
        index: u64,
        /// What failed to validate.
        reason: String,
    },

    /// The on-disk segment chain is inconsistent.
    #[error("corrupted journal: {reason}")]
    CorruptedJournal {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A segment file does not start with the journal magic number.
    #[error("invalid segment magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Magic number this build writes.
        expected: u32,
        /// Magic number found on disk.
        found: u32,
    },

    /// A segment file was written by an unsupported format version.
    #[error("unsupported segment format version: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// Format version this build supports.
        expected: u32,
        /// Format version found on disk.
        found: u32,
    },

    /// The journal has been closed.
    #[error("journal is closed")]
    Closed,

    /// Invalid journal configuration.
    #[error("journal configuration error: {reason}")]
    ConfigError {
        /// Which configuration constraint was violated.
        reason: String,
    },
}

impl JournalError {
    /// Creates an invalid index error.
    pub fn invalid_index(index: u64, reason: impl Into<String>) -> Self {
        Self::InvalidIndex {
            index,
            reason: reason.into(),
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(index: u64, expected: u32, computed: u32) -> Self {
        Self::InvalidChecksum {
            index,
            expected,
            computed,
        }
    }

    /// Creates a record too large error.
    pub fn record_too_large(size: usize, max: usize) -> Self {
        Self::RecordTooLarge { size, max }
    }

    /// Creates a corrupted frame error.
    pub fn corrupted_frame(segment_id: SegmentId, index: u64, reason: impl Into<String>) -> Self {
        Self::CorruptedFrame {
            segment_id,
            index,
            reason: reason.into(),
        }
    }

    /// Creates a corrupted journal error.
    pub fn corrupted_journal(reason: impl Into<String>) -> Self {
        Self::CorruptedJournal {
            reason: reason.into(),
        }
    }

    /// Creates a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptedFrame { .. }
                | Self::CorruptedJournal { .. }
                | Self::InvalidMagic { .. }
        )
    }

    /// Returns true if the operation can be retried after handling the error.
    ///
    /// `SegmentFull` is recoverable by rolling over to a new segment.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SegmentFull { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = JournalError::corrupted_frame(SegmentId::new(1), 10, "bad crc");
        assert!(err.is_corruption());
        assert!(!err.is_recoverable());

        let err = JournalError::checksum_mismatch(10, 0x1234, 0x5678);
        assert!(!err.is_corruption());

        let err = JournalError::SegmentFull {
            segment_id: SegmentId::new(1),
            needed: 128,
            remaining: 16,
        };
        assert!(err.is_recoverable());
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = JournalError::record_too_large(2_000_000, 1_048_576);
        let msg = format!("{}", err);
        assert!(msg.contains("2000000"));
        assert!(msg.contains("1048576"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: JournalError = io_err.into();
        assert!(matches!(err, JournalError::Io { .. }));
    }
}
