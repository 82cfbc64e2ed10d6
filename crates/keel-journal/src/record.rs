//! Journal records and the on-disk frame codec.
//!
//! Every record is stored as one *frame*:
//!
//! ```text
//! +----------+----------+---------------------------------+
//! | length   | checksum | body                            |
//! | (4, LE)  | (4, LE)  | index (8) | asqn (8) | data (n) |
//! +----------+----------+---------------------------------+
//! ```
//!
//! The length counts the body only; a zero length word terminates the live
//! region of a segment. The checksum is a CRC32 over the body bytes, so the
//! index and asqn are covered along with the caller's payload. The body
//! codec is fixed and deterministic so checksums reproduce on reopen.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use keel_common::constants::{FRAME_HEADER_SIZE, RECORD_METADATA_SIZE};
use keel_common::types::Asqn;

/// An immutable journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    index: u64,
    asqn: Asqn,
    checksum: u32,
    data: Bytes,
}

impl Record {
    /// Creates a record from its parts.
    ///
    /// The checksum is trusted as given; use [`checksum_of`] to compute one
    /// for a body about to be written.
    pub fn new(index: u64, asqn: Asqn, checksum: u32, data: Bytes) -> Self {
        Self {
            index,
            asqn,
            checksum,
            data,
        }
    }

    /// The dense journal index assigned to this record.
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The application sequence number, or [`Asqn::UNSPECIFIED`].
    #[inline]
    pub fn asqn(&self) -> Asqn {
        self.asqn
    }

    /// CRC32 over the serialized record body.
    #[inline]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The caller's opaque payload.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Frame header: body length and body checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the body in bytes. Zero terminates the live region.
    pub length: u32,
    /// CRC32 over the body bytes.
    pub checksum: u32,
}

impl FrameHeader {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = FRAME_HEADER_SIZE;

    /// Serializes the header.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.checksum);
    }

    /// Deserializes a header from exactly [`FrameHeader::SIZE`] bytes.
    pub fn decode(mut buf: &[u8]) -> Self {
        let length = buf.get_u32_le();
        let checksum = buf.get_u32_le();
        Self { length, checksum }
    }

    /// Whether this header marks the end of the live region.
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.length == 0
    }
}

/// Returns the body length for a payload of `data_len` bytes.
#[inline]
pub fn body_len(data_len: usize) -> usize {
    RECORD_METADATA_SIZE + data_len
}

/// Serializes a record body into `buf`.
pub fn encode_body(index: u64, asqn: Asqn, data: &[u8], buf: &mut BytesMut) {
    buf.put_u64_le(index);
    buf.put_u64_le(asqn.as_u64());
    buf.put_slice(data);
}

/// Deserializes a record body.
///
/// Returns `None` when the body is too short to carry the record metadata;
/// callers treat that the same as any other invalid frame.
pub fn decode_body(mut body: &[u8]) -> Option<(u64, Asqn, Bytes)> {
    if body.len() < RECORD_METADATA_SIZE {
        return None;
    }
    let index = body.get_u64_le();
    let asqn = Asqn::new(body.get_u64_le());
    Some((index, asqn, Bytes::copy_from_slice(body)))
}

/// Computes the CRC32 checksum over a record body.
pub fn checksum_of(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_roundtrip() {
        let header = FrameHeader {
            length: 256,
            checksum: 0xDEAD_BEEF,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), FrameHeader::SIZE);

        let decoded = FrameHeader::decode(&buf);
        assert_eq!(decoded, header);
        assert!(!decoded.is_terminator());
    }

    #[test]
    fn test_zero_length_terminates() {
        let header = FrameHeader::decode(&[0u8; FrameHeader::SIZE]);
        assert!(header.is_terminator());
    }

    #[test]
    fn test_body_roundtrip() {
        let mut buf = BytesMut::new();
        encode_body(7, Asqn::new(70), b"TestData", &mut buf);
        assert_eq!(buf.len(), body_len(8));

        let (index, asqn, data) = decode_body(&buf).unwrap();
        assert_eq!(index, 7);
        assert_eq!(asqn, Asqn::new(70));
        assert_eq!(data.as_ref(), b"TestData");
    }

    #[test]
    fn test_body_too_short() {
        assert!(decode_body(&[0u8; RECORD_METADATA_SIZE - 1]).is_none());
    }

    #[test]
    fn test_checksum_detects_flips() {
        let mut buf = BytesMut::new();
        encode_body(1, Asqn::UNSPECIFIED, b"payload", &mut buf);

        let checksum = checksum_of(&buf);
        buf[RECORD_METADATA_SIZE] ^= 0xFF;
        assert_ne!(checksum, checksum_of(&buf));
    }

    #[test]
    fn test_checksum_covers_metadata() {
        let mut a = BytesMut::new();
        encode_body(1, Asqn::new(10), b"same", &mut a);
        let mut b = BytesMut::new();
        encode_body(2, Asqn::new(10), b"same", &mut b);

        assert_ne!(checksum_of(&a), checksum_of(&b));
    }
}
