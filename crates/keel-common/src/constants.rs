//! System-wide constants for the Keel journal.
//!
//! This module defines the on-disk format constants and the default limits
//! used across the journal.

// =============================================================================
// On-Disk Format
// =============================================================================

/// Magic number identifying a Keel segment file.
pub const SEGMENT_MAGIC: u32 = 0x4B45_454C; // "KEEL" in ASCII

/// Version number for the segment file format.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the fixed segment descriptor at the start of every segment file.
///
/// The descriptor contains: magic (4), version (4), segment id (8),
/// first index (8), max segment size (8), max entries (8) = 40 bytes.
/// The remainder is reserved padding so the header size stays fixed
/// across format versions.
pub const DESCRIPTOR_SIZE: usize = 64;

/// Size of the frame header preceding every record body.
///
/// Contains: body length (4), CRC32 over the body (4).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Size of the record metadata encoded at the start of every record body.
///
/// Contains: record index (8), asqn (8). The caller's payload follows.
pub const RECORD_METADATA_SIZE: usize = 16;

// =============================================================================
// Journal Limits
// =============================================================================

/// Default segment file size (32 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;

/// Default maximum size of a single record body (1 MiB).
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 1024 * 1024;

/// Default maximum number of records per segment (unbounded).
pub const DEFAULT_MAX_ENTRIES: u64 = u64::MAX;

/// Default sparse index density: one offset retained every k-th record.
pub const DEFAULT_INDEX_DENSITY: u64 = 5;

/// Smallest permitted segment size.
///
/// A segment must hold its descriptor plus at least one maximum-sized frame.
pub const MIN_SEGMENT_SIZE: u64 = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_constants() {
        // The descriptor must hold all of its fields.
        assert!(DESCRIPTOR_SIZE >= 40);

        // Frame overhead is a length word plus a checksum word.
        assert_eq!(FRAME_HEADER_SIZE, 8);
        assert_eq!(RECORD_METADATA_SIZE, 16);
    }

    #[test]
    fn test_default_limits() {
        // A default segment fits many default-sized entries.
        let frame = (DEFAULT_MAX_ENTRY_SIZE + FRAME_HEADER_SIZE) as u64;
        assert!(DEFAULT_MAX_SEGMENT_SIZE > frame * 2);
        assert!(MIN_SEGMENT_SIZE <= DEFAULT_MAX_SEGMENT_SIZE);
    }
}
