//! Segment writer.
//!
//! One writer exists per segment, and only the active segment has one. The
//! writer frames, checksums, and appends records, tracks the last entry,
//! and handles tail truncation and the recovery rescan on open.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use keel_common::constants::{DESCRIPTOR_SIZE, FRAME_HEADER_SIZE};
use keel_common::types::Asqn;

use crate::error::{JournalError, JournalResult};
use crate::record::{self, FrameHeader, Record};
use crate::segment::Segment;

/// Appends framed records to one segment file.
///
/// The writer owns the segment's only writable file handle and a scratch
/// buffer sized for one maximum frame, reused across appends so the frame
/// header and body go to disk in a single write.
pub struct SegmentWriter {
    segment: Arc<Segment>,
    file: File,
    /// Byte offset where the next frame will be written.
    position: u64,
    last_entry: Option<Record>,
    max_entry_size: usize,
    scratch: BytesMut,
    /// Set when the last rescan stopped at an invalid frame rather than at
    /// the zero terminator; the journal reports the discarded tail.
    dirty_tail: bool,
}

impl SegmentWriter {
    /// Opens the writer for a segment, rescanning the file to rebuild the
    /// last entry and the sparse index.
    pub fn open(segment: Arc<Segment>, max_entry_size: usize) -> JournalResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(segment.path())?;

        let mut writer = Self {
            segment,
            file,
            position: DESCRIPTOR_SIZE as u64,
            last_entry: None,
            max_entry_size,
            scratch: BytesMut::with_capacity(max_entry_size + FRAME_HEADER_SIZE),
            dirty_tail: false,
        };
        writer.reset(0)?;
        Ok(writer)
    }

    /// The segment this writer appends to.
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Index of the first record of the segment.
    #[inline]
    pub fn first_index(&self) -> u64 {
        self.segment.first_index()
    }

    /// Index of the last appended record, or `first_index - 1` when empty.
    pub fn last_index(&self) -> u64 {
        self.last_entry
            .as_ref()
            .map_or(self.first_index() - 1, Record::index)
    }

    /// Index the next appended record will be assigned.
    pub fn next_index(&self) -> u64 {
        self.last_index() + 1
    }

    /// The last appended record, if any.
    pub fn last_entry(&self) -> Option<&Record> {
        self.last_entry.as_ref()
    }

    /// Bytes written to the segment so far, including the descriptor.
    pub fn size(&self) -> u64 {
        self.position
    }

    /// Whether the segment holds no records.
    pub fn is_empty(&self) -> bool {
        self.last_entry.is_none()
    }

    /// Whether the segment reached its size or entry-count cap.
    pub fn is_full(&self) -> bool {
        self.position >= self.segment.descriptor().max_segment_size()
            || self.next_index() - self.first_index() >= self.segment.descriptor().max_entries()
    }

    /// Appends a record with the next sequential index.
    ///
    /// The frame is written with a single `write_all`; the in-memory state
    /// is only updated after the write returns, so a failed write leaves
    /// the writer consistent with what recovery would rebuild from disk.
    /// No fsync happens here; durability is [`SegmentWriter::flush`].
    pub fn append(&mut self, asqn: Asqn, data: &[u8]) -> JournalResult<Record> {
        let body_len = record::body_len(data.len());
        if body_len > self.max_entry_size {
            return Err(JournalError::record_too_large(body_len, self.max_entry_size));
        }

        let frame_len = FRAME_HEADER_SIZE + body_len;
        let max_segment_size = self.segment.descriptor().max_segment_size();
        if self.position + frame_len as u64 > max_segment_size
            || self.next_index() - self.first_index() >= self.segment.descriptor().max_entries()
        {
            return Err(JournalError::SegmentFull {
                segment_id: self.segment.id(),
                needed: frame_len,
                remaining: max_segment_size.saturating_sub(self.position),
            });
        }

        let index = self.next_index();

        self.scratch.clear();
        self.scratch.put_u32_le(body_len as u32);
        self.scratch.put_u32_le(0); // checksum backpatched below
        record::encode_body(index, asqn, data, &mut self.scratch);
        let checksum = record::checksum_of(&self.scratch[FRAME_HEADER_SIZE..]);
        self.scratch[4..FRAME_HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());

        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.write_all(&self.scratch)?;

        let record = Record::new(index, asqn, checksum, Bytes::copy_from_slice(data));
        self.index_record(index, self.position);
        self.position += frame_len as u64;
        self.last_entry = Some(record.clone());
        self.segment.set_last_index(index);

        Ok(record)
    }

    /// Appends a pre-framed record from the replication path.
    ///
    /// The record must carry exactly the next sequential index; the journal
    /// resolves duplicates and conflicts before delegating here. The
    /// supplied checksum is verified against the re-encoded body before
    /// anything touches the file.
    pub fn append_record(&mut self, record: &Record) -> JournalResult<Record> {
        let next = self.next_index();
        if record.index() != next {
            return Err(JournalError::invalid_index(
                record.index(),
                format!("expected next index {}", next),
            ));
        }

        let mut body = BytesMut::with_capacity(record::body_len(record.data().len()));
        record::encode_body(record.index(), record.asqn(), record.data(), &mut body);
        let computed = record::checksum_of(&body);
        if computed != record.checksum() {
            return Err(JournalError::checksum_mismatch(
                record.index(),
                record.checksum(),
                computed,
            ));
        }

        self.append(record.asqn(), record.data())
    }

    /// Truncates the segment so that `index` is the last record.
    ///
    /// Frames after `index` are zero-filled in place, keeping the format
    /// self-delimiting. An `index` at or past the last record is a no-op;
    /// an `index` before the segment's first record erases every frame.
    pub fn truncate(&mut self, index: u64) -> JournalResult<()> {
        if index >= self.last_index() {
            return Ok(());
        }

        let old_position = self.position;
        self.last_entry = None;
        self.segment.sparse_index().write().truncate(index);

        if index < self.first_index() {
            self.position = DESCRIPTOR_SIZE as u64;
        } else {
            self.rescan(index)?;
        }
        self.segment.set_last_index(self.last_index());
        self.segment.bump_generation();
        self.zero_fill(self.position, old_position)?;

        Ok(())
    }

    /// Rebuilds the writer state from the frames on disk.
    ///
    /// Scans from just past the descriptor, validating each frame, and
    /// stops at the first invalid or zero-length frame or once `up_to`
    /// (0 = unbounded) has been consumed. The write position ends up just
    /// past the last valid frame so subsequent appends are contiguous.
    pub fn reset(&mut self, up_to: u64) -> JournalResult<()> {
        self.rescan(up_to)?;
        self.segment.set_last_index(self.last_index());
        Ok(())
    }

    /// Fsyncs the segment file.
    pub fn flush(&mut self) -> JournalResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Whether the last rescan discarded a torn or corrupted tail.
    pub(crate) fn dirty_tail(&self) -> bool {
        self.dirty_tail
    }

    fn rescan(&mut self, up_to: u64) -> JournalResult<()> {
        let first_index = self.first_index();
        let max_segment_size = self.segment.descriptor().max_segment_size();

        self.last_entry = None;
        self.dirty_tail = false;
        self.segment.sparse_index().write().clear();
        self.position = DESCRIPTOR_SIZE as u64;

        let mut next_index = first_index;
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];

        loop {
            if up_to != 0 && next_index > up_to {
                break;
            }
            if self.position + FRAME_HEADER_SIZE as u64 > max_segment_size {
                break;
            }

            self.file.seek(SeekFrom::Start(self.position))?;
            match self.file.read_exact(&mut header_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let header = FrameHeader::decode(&header_buf);
            if header.is_terminator() {
                break;
            }

            let length = header.length as usize;
            if length > self.max_entry_size
                || self.position + (FRAME_HEADER_SIZE + length) as u64 > max_segment_size
            {
                self.dirty_tail = true;
                break;
            }

            self.scratch.clear();
            self.scratch.resize(length, 0);
            match self.file.read_exact(&mut self.scratch) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.dirty_tail = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if record::checksum_of(&self.scratch) != header.checksum {
                self.dirty_tail = true;
                break;
            }
            let Some((index, asqn, data)) = record::decode_body(&self.scratch) else {
                self.dirty_tail = true;
                break;
            };
            if index != next_index {
                self.dirty_tail = true;
                break;
            }

            self.index_record(index, self.position);
            self.position += (FRAME_HEADER_SIZE + length) as u64;
            self.last_entry = Some(Record::new(index, asqn, header.checksum, data));
            next_index += 1;
        }

        Ok(())
    }

    fn index_record(&self, index: u64, position: u64) {
        let sparse = self.segment.sparse_index();
        if sparse.read().accepts(index) {
            sparse.write().maybe_index(index, position);
        }
    }

    fn zero_fill(&mut self, mut from: u64, to: u64) -> JournalResult<()> {
        if from >= to {
            return Ok(());
        }

        let zeros = [0u8; 8192];
        self.file.seek(SeekFrom::Start(from))?;
        while from < to {
            let n = ((to - from) as usize).min(zeros.len());
            self.file.write_all(&zeros[..n])?;
            from += n as u64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("segment", &self.segment.id())
            .field("position", &self.position)
            .field("last_index", &self.last_index())
            .finish()
    }
}
