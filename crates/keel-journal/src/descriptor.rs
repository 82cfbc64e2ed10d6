//! Segment descriptor.
//!
//! The descriptor is a fixed 64-byte header at the start of every segment
//! file. It is written and flushed before any frame, and its `first_index`
//! is authoritative: the first frame of the segment carries exactly that
//! index.

use bytes::{Buf, BufMut};

use keel_common::constants::{DESCRIPTOR_SIZE, SEGMENT_FORMAT_VERSION, SEGMENT_MAGIC};
use keel_common::types::SegmentId;

use crate::error::{JournalError, JournalResult};

/// Fixed-size segment file header.
///
/// Layout (little-endian):
/// - magic: 4 bytes
/// - format version: 4 bytes
/// - segment id: 8 bytes
/// - first index: 8 bytes
/// - max segment size: 8 bytes
/// - max entries: 8 bytes
/// - reserved: zero padding to 64 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    segment_id: SegmentId,
    first_index: u64,
    max_segment_size: u64,
    max_entries: u64,
}

impl SegmentDescriptor {
    /// Size of the encoded descriptor in bytes.
    pub const SIZE: usize = DESCRIPTOR_SIZE;

    /// Creates a new descriptor.
    pub fn new(
        segment_id: SegmentId,
        first_index: u64,
        max_segment_size: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            segment_id,
            first_index,
            max_segment_size,
            max_entries,
        }
    }

    /// The 1-based, monotonically increasing segment identifier.
    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Index of the first record of this segment.
    #[inline]
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Size cap of the segment file in bytes.
    #[inline]
    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    /// Maximum number of records in this segment.
    #[inline]
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Serializes the descriptor to its fixed-size byte form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut buf = &mut bytes[..];
        buf.put_u32_le(SEGMENT_MAGIC);
        buf.put_u32_le(SEGMENT_FORMAT_VERSION);
        buf.put_u64_le(self.segment_id.as_u64());
        buf.put_u64_le(self.first_index);
        buf.put_u64_le(self.max_segment_size);
        buf.put_u64_le(self.max_entries);
        // remainder stays zero (reserved)
        bytes
    }

    /// Deserializes a descriptor, validating magic and version first.
    pub fn decode(bytes: &[u8]) -> JournalResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(JournalError::corrupted_journal(format!(
                "segment header truncated: {} of {} bytes",
                bytes.len(),
                Self::SIZE
            )));
        }

        let mut buf = &bytes[..];
        let magic = buf.get_u32_le();
        if magic != SEGMENT_MAGIC {
            return Err(JournalError::InvalidMagic {
                expected: SEGMENT_MAGIC,
                found: magic,
            });
        }

        let version = buf.get_u32_le();
        if version != SEGMENT_FORMAT_VERSION {
            return Err(JournalError::UnsupportedVersion {
                expected: SEGMENT_FORMAT_VERSION,
                found: version,
            });
        }

        let segment_id = SegmentId::new(buf.get_u64_le());
        let first_index = buf.get_u64_le();
        let max_segment_size = buf.get_u64_le();
        let max_entries = buf.get_u64_le();

        Ok(Self {
            segment_id,
            first_index,
            max_segment_size,
            max_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SegmentDescriptor {
        SegmentDescriptor::new(SegmentId::new(3), 1001, 32 * 1024 * 1024, u64::MAX)
    }

    #[test]
    fn test_roundtrip() {
        let encoded = descriptor().encode();
        assert_eq!(encoded.len(), SegmentDescriptor::SIZE);

        let decoded = SegmentDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded, descriptor());
    }

    #[test]
    fn test_invalid_magic() {
        let mut encoded = descriptor().encode();
        encoded[0] ^= 0xFF;

        let err = SegmentDescriptor::decode(&encoded).unwrap_err();
        assert!(matches!(err, JournalError::InvalidMagic { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let mut encoded = descriptor().encode();
        encoded[4] = 99;

        let err = SegmentDescriptor::decode(&encoded).unwrap_err();
        assert!(matches!(
            err,
            JournalError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_truncated_header() {
        let encoded = descriptor().encode();
        let err = SegmentDescriptor::decode(&encoded[..10]).unwrap_err();
        assert!(err.is_corruption());
    }
}
