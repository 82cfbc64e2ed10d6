//! Journal readers.
//!
//! [`SegmentReader`] is a stateful cursor over one segment with its own
//! read-only file handle. [`JournalReader`] stitches segment cursors
//! together, crossing segment boundaries transparently and re-resolving its
//! position after truncation, compaction, or reset.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use keel_common::constants::{DESCRIPTOR_SIZE, FRAME_HEADER_SIZE};
use keel_common::types::Asqn;

use crate::error::{JournalError, JournalResult};
use crate::journal::JournalShared;
use crate::record::{self, FrameHeader, Record};
use crate::segment::Segment;

/// Cursor over the frames of one segment.
///
/// Each reader owns an independent file handle and never observes bytes
/// past the segment's committed `last_index`, so it cannot see frames the
/// writer has not finished publishing.
pub struct SegmentReader {
    segment: Arc<Segment>,
    file: File,
    position: u64,
    next_index: u64,
    /// Segment truncation generation this cursor's position belongs to.
    generation: u64,
    max_entry_size: usize,
}

impl SegmentReader {
    pub(crate) fn open(segment: Arc<Segment>, max_entry_size: usize) -> JournalResult<Self> {
        let file = File::open(segment.path())?;
        let next_index = segment.first_index();
        let generation = segment.generation();
        Ok(Self {
            segment,
            file,
            position: DESCRIPTOR_SIZE as u64,
            next_index,
            generation,
            max_entry_size,
        })
    }

    /// The segment this cursor reads.
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Index of the record the next [`SegmentReader::read_next`] returns.
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Generation of the segment when this cursor was last positioned.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a committed record remains at the cursor position.
    pub fn has_next(&self) -> bool {
        self.next_index <= self.segment.last_index()
    }

    /// Reads the next record, or `None` past the committed region.
    ///
    /// A frame that fails validation inside the committed region indicates
    /// media corruption and surfaces as [`JournalError::CorruptedFrame`].
    pub fn read_next(&mut self) -> JournalResult<Option<Record>> {
        if !self.has_next() {
            return Ok(None);
        }

        let (record, frame_len) = self.read_frame()?;
        self.position += frame_len;
        self.next_index += 1;
        Ok(Some(record))
    }

    /// Positions the cursor so the next read returns `index`.
    ///
    /// The target is clamped to the committed range. The sparse index
    /// supplies the closest known frame at or before the target; the rest
    /// is a forward scan.
    pub fn seek(&mut self, index: u64) -> JournalResult<()> {
        let first = self.segment.first_index();
        let bound = self.segment.last_index() + 1;
        let target = index.clamp(first, bound);

        self.generation = self.segment.generation();
        let entry = self.segment.sparse_index().read().lookup(target);
        match entry {
            Some(entry) if entry.index >= first => {
                self.position = entry.position;
                self.next_index = entry.index;
            }
            _ => {
                self.position = DESCRIPTOR_SIZE as u64;
                self.next_index = first;
            }
        }

        while self.next_index < target {
            if self.read_next()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Positions the cursor on the last committed record.
    pub fn seek_to_last(&mut self) -> JournalResult<u64> {
        let last = self.segment.last_index();
        self.seek(last)?;
        Ok(last)
    }

    /// Positions the cursor on the last record of this segment whose
    /// specified asqn is at most `asqn`, returning its index.
    ///
    /// When no record qualifies, the cursor moves to the segment's first
    /// record and `first_index - 1` is returned.
    pub fn seek_to_asqn(&mut self, asqn: Asqn) -> JournalResult<u64> {
        let first = self.segment.first_index();
        self.seek(first)?;

        let mut found = None;
        while let Some(record) = self.read_next()? {
            let record_asqn = record.asqn();
            if record_asqn.is_specified() {
                if record_asqn > asqn {
                    break;
                }
                found = Some(record.index());
            }
        }

        match found {
            Some(index) => {
                self.seek(index)?;
                Ok(index)
            }
            None => {
                self.seek(first)?;
                Ok(first - 1)
            }
        }
    }

    fn read_frame(&mut self) -> JournalResult<(Record, u64)> {
        let segment_id = self.segment.id();
        let index = self.next_index;

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(self.position))?;
        match self.file.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(JournalError::corrupted_frame(
                    segment_id,
                    index,
                    "frame header past end of file",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let header = FrameHeader::decode(&header_buf);
        if header.is_terminator() {
            return Err(JournalError::corrupted_frame(
                segment_id,
                index,
                "zero frame inside committed region",
            ));
        }

        let length = header.length as usize;
        if length > self.max_entry_size {
            return Err(JournalError::corrupted_frame(
                segment_id,
                index,
                format!("frame length {} exceeds maximum entry size", length),
            ));
        }

        let mut body = vec![0u8; length];
        match self.file.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(JournalError::corrupted_frame(
                    segment_id,
                    index,
                    "frame body past end of file",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let computed = record::checksum_of(&body);
        if computed != header.checksum {
            return Err(JournalError::corrupted_frame(
                segment_id,
                index,
                format!(
                    "checksum mismatch: stored {:#010x}, computed {:#010x}",
                    header.checksum, computed
                ),
            ));
        }

        let Some((frame_index, asqn, data)) = record::decode_body(&body) else {
            return Err(JournalError::corrupted_frame(
                segment_id,
                index,
                "frame body shorter than record metadata",
            ));
        };
        if frame_index != index {
            return Err(JournalError::corrupted_frame(
                segment_id,
                index,
                format!("non-sequential record index {}", frame_index),
            ));
        }

        let record = Record::new(frame_index, asqn, header.checksum, data);
        Ok((record, (FRAME_HEADER_SIZE + length) as u64))
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("segment", &self.segment.id())
            .field("next_index", &self.next_index)
            .field("position", &self.position)
            .finish()
    }
}

/// Cursor over the whole journal.
///
/// Any number of readers may run concurrently with the single writer. A
/// reader keeps its own position; when the journal is truncated, compacted,
/// or reset underneath it, the reader re-resolves its position on the next
/// operation instead of returning stale records.
pub struct JournalReader {
    shared: Arc<JournalShared>,
    next_index: u64,
    current: Option<SegmentReader>,
}

impl JournalReader {
    pub(crate) fn new(shared: Arc<JournalShared>) -> Self {
        let next_index = shared.first_index();
        Self {
            shared,
            next_index,
            current: None,
        }
    }

    /// Index of the record the next [`JournalReader::next`] returns.
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Whether a record remains at the cursor position.
    pub fn has_next(&self) -> bool {
        if self.shared.is_closed() {
            return false;
        }
        self.next_index.max(self.shared.first_index()) <= self.shared.last_index()
    }

    /// Reads the next record, or `None` at the end of the journal.
    pub fn next(&mut self) -> JournalResult<Option<Record>> {
        if self.shared.is_closed() {
            return Err(JournalError::Closed);
        }

        // Compaction may have retired everything before the current head.
        let first = self.shared.first_index();
        if self.next_index < first {
            self.next_index = first;
            self.current = None;
        }
        if self.next_index > self.shared.last_index() {
            return Ok(None);
        }

        let valid = self.current.as_ref().is_some_and(|reader| {
            reader.next_index() == self.next_index
                && reader.generation() == reader.segment().generation()
                && self.next_index <= reader.segment().last_index()
        });
        if !valid {
            self.current = None;
            let Some(segment) = self.shared.resolve_segment(self.next_index) else {
                return Ok(None);
            };
            if self.next_index > segment.last_index() {
                return Ok(None);
            }
            let mut reader = segment.open_reader(self.shared.max_entry_size())?;
            reader.seek(self.next_index)?;
            self.current = Some(reader);
        }

        match self
            .current
            .as_mut()
            .expect("reader resolved above")
            .read_next()?
        {
            Some(record) => {
                self.next_index += 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Positions the cursor so the next read returns `index`, clamped to
    /// the journal's committed range.
    pub fn seek(&mut self, index: u64) {
        let first = self.shared.first_index();
        let bound = self.shared.last_index() + 1;
        self.next_index = index.clamp(first, bound);
        self.current = None;
    }

    /// Positions the cursor on the first record of the journal.
    pub fn seek_to_first(&mut self) {
        let first = self.shared.first_index();
        self.seek(first);
    }

    /// Positions the cursor on the last record and returns its index.
    ///
    /// On an empty journal this returns `first_index - 1` and leaves the
    /// cursor at the head.
    pub fn seek_to_last(&mut self) -> u64 {
        let last = self.shared.last_index();
        self.seek(last);
        last
    }

    /// Positions the cursor on the last record whose specified asqn is at
    /// most `asqn`, returning its index.
    ///
    /// Records without a sequence number are skipped over. When no record
    /// qualifies, the cursor moves to the head and `first_index - 1` is
    /// returned.
    pub fn seek_to_asqn(&mut self, asqn: Asqn) -> JournalResult<u64> {
        let first = self.shared.first_index();
        self.seek(first);

        let mut found = None;
        while let Some(record) = self.next()? {
            let record_asqn = record.asqn();
            if record_asqn.is_specified() {
                // Asqns are monotonic, so the first overshoot ends the scan.
                if record_asqn > asqn {
                    break;
                }
                found = Some(record.index());
            }
        }

        match found {
            Some(index) => {
                self.seek(index);
                Ok(index)
            }
            None => {
                self.seek(first);
                Ok(first - 1)
            }
        }
    }
}

impl std::fmt::Debug for JournalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalReader")
            .field("next_index", &self.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SegmentDescriptor;
    use crate::writer::SegmentWriter;
    use keel_common::types::SegmentId;
    use std::path::Path;
    use tempfile::TempDir;

    const MAX_ENTRY_SIZE: usize = 1024;

    fn segment(dir: &Path) -> Arc<Segment> {
        let descriptor =
            SegmentDescriptor::new(SegmentId::new(1), 1, 64 * 1024, u64::MAX);
        Arc::new(Segment::create(dir.join("journal-1.log"), descriptor, 5).unwrap())
    }

    #[test]
    fn test_read_back_in_order() {
        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();

        let mut written = Vec::new();
        for i in 0..10u64 {
            written.push(writer.append(Asqn::new(i + 10), b"TestData").unwrap());
        }

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        for expected in &written {
            assert!(reader.has_next());
            let record = reader.read_next().unwrap().unwrap();
            assert_eq!(&record, expected);
        }
        assert!(!reader.has_next());
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_reader_does_not_pass_commit_boundary() {
        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        assert!(!reader.has_next());

        writer.append(Asqn::UNSPECIFIED, b"TestData").unwrap();
        assert!(reader.has_next());
        reader.read_next().unwrap().unwrap();
        assert!(!reader.has_next());
    }

    #[test]
    fn test_seek_uses_sparse_index() {
        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();

        for i in 0..20u64 {
            writer
                .append(Asqn::new(i + 1), format!("record-{}", i).as_bytes())
                .unwrap();
        }

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        reader.seek(13).unwrap();
        let record = reader.read_next().unwrap().unwrap();
        assert_eq!(record.index(), 13);
        assert_eq!(record.data().as_ref(), b"record-12");

        // Seeking past the end clamps to one past the last record.
        reader.seek(100).unwrap();
        assert!(!reader.has_next());

        // Seeking before the start clamps to the first record.
        reader.seek(0).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().index(), 1);
    }

    #[test]
    fn test_seek_to_last() {
        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();

        for _ in 0..7 {
            writer.append(Asqn::UNSPECIFIED, b"TestData").unwrap();
        }

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        assert_eq!(reader.seek_to_last().unwrap(), 7);
        assert_eq!(reader.read_next().unwrap().unwrap().index(), 7);
        assert!(!reader.has_next());
    }

    #[test]
    fn test_seek_to_asqn_within_segment() {
        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();

        writer.append(Asqn::new(10), b"TestData").unwrap();
        writer.append(Asqn::UNSPECIFIED, b"TestData").unwrap();
        writer.append(Asqn::new(30), b"TestData").unwrap();

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        assert_eq!(reader.seek_to_asqn(Asqn::new(20)).unwrap(), 1);
        assert_eq!(reader.read_next().unwrap().unwrap().asqn(), Asqn::new(10));

        assert_eq!(reader.seek_to_asqn(Asqn::new(30)).unwrap(), 3);
        assert_eq!(reader.seek_to_asqn(Asqn::new(5)).unwrap(), 0);
    }

    #[test]
    fn test_corrupted_committed_frame_is_fatal() {
        use std::fs::OpenOptions;
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let segment = segment(tmp.path());
        let mut writer = SegmentWriter::open(Arc::clone(&segment), MAX_ENTRY_SIZE).unwrap();
        writer.append(Asqn::UNSPECIFIED, b"TestData").unwrap();

        // Corrupt the committed frame behind the reader's back.
        {
            let mut file = OpenOptions::new()
                .write(true)
                .open(segment.path())
                .unwrap();
            file.seek(SeekFrom::Start(
                (DESCRIPTOR_SIZE + FRAME_HEADER_SIZE + 2) as u64,
            ))
            .unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let mut reader = segment.open_reader(MAX_ENTRY_SIZE).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, JournalError::CorruptedFrame { .. }));
        assert!(err.is_corruption());
    }
}
