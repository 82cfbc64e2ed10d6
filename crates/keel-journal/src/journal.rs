//! The segmented journal.
//!
//! This module provides the top-level [`Journal`] that manages the ordered
//! collection of segments: recovery on open, appends with rollover, tail
//! truncation, head compaction, and reset.

use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use keel_common::constants::FRAME_HEADER_SIZE;
use keel_common::types::{Asqn, SegmentId};

use crate::config::JournalConfig;
use crate::descriptor::SegmentDescriptor;
use crate::error::{JournalError, JournalResult};
use crate::reader::JournalReader;
use crate::record::{self, Record};
use crate::segment::Segment;
use crate::writer::SegmentWriter;

/// Journal statistics.
#[derive(Debug, Default)]
pub struct JournalStats {
    /// Total records appended.
    pub records_appended: AtomicU64,
    /// Total payload bytes appended.
    pub bytes_appended: AtomicU64,
    /// Number of explicit flushes.
    pub flushes: AtomicU64,
    /// Number of segments created, including rollovers.
    pub segments_created: AtomicU64,
    /// Number of tail truncations.
    pub truncations: AtomicU64,
}

/// State shared between the journal facade and its readers.
pub(crate) struct JournalShared {
    config: JournalConfig,
    state: RwLock<JournalState>,
    closed: AtomicBool,
    stats: JournalStats,
}

/// Mutable journal state, guarded by one exclusive lock.
///
/// Appends, truncation, reset, and rollover all mutate under the write
/// half; readers only take the read half to resolve which segment holds
/// their next index.
struct JournalState {
    /// Segments keyed by their first index.
    segments: BTreeMap<u64, Arc<Segment>>,
    /// Writer of the active (last) segment.
    writer: SegmentWriter,
    /// Sequence number of the last record that carried one.
    last_asqn: Asqn,
}

impl JournalShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn first_index(&self) -> u64 {
        let state = self.state.read();
        state
            .segments
            .values()
            .next()
            .map_or(1, |segment| segment.first_index())
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.state.read().writer.last_index()
    }

    pub(crate) fn resolve_segment(&self, index: u64) -> Option<Arc<Segment>> {
        let state = self.state.read();
        state
            .segments
            .range(..=index)
            .next_back()
            .map(|(_, segment)| Arc::clone(segment))
    }

    pub(crate) fn max_entry_size(&self) -> usize {
        self.config.max_entry_size
    }
}

/// A durable, append-only segmented journal.
///
/// The journal assumes a single writer thread; appends, truncations, and
/// resets must not race each other. Any number of [`JournalReader`]s may
/// run concurrently with the writer.
pub struct Journal {
    shared: Arc<JournalShared>,
}

impl Journal {
    /// Opens the journal in the configured directory, recovering existing
    /// segments.
    ///
    /// The descriptor chain is validated (`CorruptedJournal` on gaps or
    /// overlaps) and the tail segment is rescanned, discarding any torn or
    /// corrupted suffix. A missing or empty directory yields a fresh
    /// journal whose first record will be index 1.
    pub fn open(config: JournalConfig) -> JournalResult<Self> {
        config.validate().map_err(JournalError::config_error)?;
        fs::create_dir_all(&config.directory)?;

        let mut found: Vec<Arc<Segment>> = Vec::new();
        for entry in fs::read_dir(&config.directory)? {
            let path = entry?.path();
            let Some(id) = config.parse_segment_id(&path) else {
                continue;
            };
            let segment = Segment::open(&path, config.index_density)?;
            if segment.id() != id {
                return Err(JournalError::corrupted_journal(format!(
                    "segment file {} carries descriptor id {}",
                    path.display(),
                    segment.id()
                )));
            }
            found.push(Arc::new(segment));
        }
        found.sort_by_key(|segment| segment.first_index());

        for pair in found.windows(2) {
            if pair[1].id().as_u64() != pair[0].id().as_u64() + 1 {
                return Err(JournalError::corrupted_journal(format!(
                    "segment ids not contiguous: {} is followed by {}",
                    pair[0].id(),
                    pair[1].id()
                )));
            }
            if pair[1].first_index() <= pair[0].first_index() {
                return Err(JournalError::corrupted_journal(format!(
                    "segments {} and {} overlap",
                    pair[0].id(),
                    pair[1].id()
                )));
            }
        }

        let mut segments = BTreeMap::new();
        let writer = if found.is_empty() {
            let segment = create_segment(&config, SegmentId::FIRST, 1)?;
            segments.insert(1, Arc::clone(&segment));
            SegmentWriter::open(segment, config.max_entry_size)?
        } else {
            // Sealed segments chain into their successor; only the tail can
            // hold a torn suffix, so only the tail is scanned here.
            for pair in found.windows(2) {
                pair[0].set_last_index(pair[1].first_index() - 1);
                pair[0].seal();
            }
            for segment in &found {
                segments.insert(segment.first_index(), Arc::clone(segment));
            }

            let tail = found.last().expect("found is non-empty");
            let writer = SegmentWriter::open(Arc::clone(tail), config.max_entry_size)?;
            if writer.dirty_tail() {
                warn!(
                    segment = %tail.id(),
                    last_index = writer.last_index(),
                    "discarded torn tail during recovery"
                );
            }
            writer
        };

        let last_asqn = scan_last_asqn(&segments, config.max_entry_size, writer.last_index())?;

        info!(
            name = %config.name,
            segments = segments.len(),
            first_index = segments.values().next().map_or(1, |s| s.first_index()),
            last_index = writer.last_index(),
            "journal opened"
        );

        Ok(Self {
            shared: Arc::new(JournalShared {
                config,
                state: RwLock::new(JournalState {
                    segments,
                    writer,
                    last_asqn,
                }),
                closed: AtomicBool::new(false),
                stats: JournalStats::default(),
            }),
        })
    }

    /// Appends a record without an application sequence number.
    pub fn append(&self, data: &[u8]) -> JournalResult<Record> {
        self.append_with_asqn(Asqn::UNSPECIFIED, data)
    }

    /// Appends a record with an application sequence number.
    ///
    /// The asqn must be greater than that of the last record which carried
    /// one; otherwise the append fails with `InvalidAsqn` and the journal
    /// is unchanged.
    pub fn append_with_asqn(&self, asqn: Asqn, data: &[u8]) -> JournalResult<Record> {
        self.check_open()?;
        let mut state = self.shared.state.write();

        if asqn.is_specified() && state.last_asqn.is_specified() && asqn <= state.last_asqn {
            return Err(JournalError::InvalidAsqn {
                asqn,
                last: state.last_asqn,
            });
        }

        let record = self.append_to_tail(&mut state, asqn, data)?;
        if asqn.is_specified() {
            state.last_asqn = asqn;
        }

        self.record_append_stats(&record);
        Ok(record)
    }

    /// Appends a pre-framed record from the replication path.
    ///
    /// The record's checksum is verified before anything is written. A
    /// record whose index skips ahead, or that is identical to the one
    /// already stored at its index, fails with `InvalidIndex`; a divergent
    /// record at an existing index truncates the tail back to the record's
    /// predecessor and appends in its place.
    pub fn append_record(&self, record: &Record) -> JournalResult<()> {
        self.check_open()?;
        if record.index() == 0 {
            return Err(JournalError::invalid_index(
                0,
                "journal indices are 1-based",
            ));
        }
        let mut state = self.shared.state.write();

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

        let next = state.writer.next_index();
        if record.index() > next {
            return Err(JournalError::invalid_index(
                record.index(),
                format!("gap: next index is {}", next),
            ));
        }
        if record.index() < next {
            match self.read_record_at(&state, record.index())? {
                Some(ref existing) if existing == record => {
                    return Err(JournalError::invalid_index(
                        record.index(),
                        "record already appended",
                    ));
                }
                _ => self.truncate_locked(&mut state, record.index() - 1)?,
            }
        }

        let appended = self.append_record_to_tail(&mut state, record)?;
        if appended.asqn().is_specified() {
            state.last_asqn = appended.asqn();
        }

        self.record_append_stats(&appended);
        Ok(())
    }

    /// Opens a cursor positioned on the journal's first record.
    pub fn open_reader(&self) -> JournalReader {
        JournalReader::new(Arc::clone(&self.shared))
    }

    /// Truncates the journal so that `index` is its last record.
    ///
    /// Whole trailing segments are deleted; the segment containing `index`
    /// is zero-filled after it. A no-op when `index` is at or past the
    /// last record.
    pub fn delete_after(&self, index: u64) -> JournalResult<()> {
        self.check_open()?;
        let mut state = self.shared.state.write();

        if index >= state.writer.last_index() {
            return Ok(());
        }

        self.truncate_locked(&mut state, index)?;
        self.shared.stats.truncations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Retires whole sealed segments whose last record is before `index`.
    ///
    /// The segment containing `index` is retained, so the journal's first
    /// index moves to that segment's first record at most. Readers
    /// positioned before the new head resume at the first retained record.
    pub fn delete_until(&self, index: u64) -> JournalResult<()> {
        self.check_open()?;
        let mut state = self.shared.state.write();

        let Some((&containing_first, _)) = state.segments.range(..=index).next_back() else {
            return Ok(());
        };

        let retained = state.segments.split_off(&containing_first);
        let removed = std::mem::replace(&mut state.segments, retained);
        for segment in removed.values() {
            debug!(segment = %segment.id(), "deleting compacted segment");
            segment.delete()?;
        }
        if !removed.is_empty() {
            info!(first_index = containing_first, "compacted journal head");
        }
        Ok(())
    }

    /// Discards every record and starts a fresh journal whose next record
    /// will carry `new_first_index`.
    ///
    /// All segments are deleted and segment ids restart at 1. Readers
    /// holding pre-reset positions observe the post-reset journal on their
    /// next operation.
    pub fn reset(&self, new_first_index: u64) -> JournalResult<()> {
        self.check_open()?;
        if new_first_index == 0 {
            return Err(JournalError::invalid_index(
                0,
                "journal indices are 1-based",
            ));
        }
        let mut state = self.shared.state.write();

        for segment in state.segments.values() {
            segment.delete()?;
        }
        state.segments.clear();

        let segment = create_segment(&self.shared.config, SegmentId::FIRST, new_first_index)?;
        state.segments.insert(new_first_index, Arc::clone(&segment));
        state.writer = SegmentWriter::open(segment, self.shared.config.max_entry_size)?;
        state.last_asqn = Asqn::UNSPECIFIED;

        info!(first_index = new_first_index, "journal reset");
        Ok(())
    }

    /// Index of the journal's first record.
    pub fn first_index(&self) -> u64 {
        self.shared.first_index()
    }

    /// Index of the journal's last record, or `first_index - 1` when empty.
    pub fn last_index(&self) -> u64 {
        self.shared.last_index()
    }

    /// Whether the journal holds no records.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.read();
        let first = state
            .segments
            .values()
            .next()
            .map_or(1, |segment| segment.first_index());
        state.writer.last_index() < first
    }

    /// Whether the journal accepts operations.
    pub fn is_open(&self) -> bool {
        !self.shared.is_closed()
    }

    /// Fsyncs the active segment.
    ///
    /// Records appended before a successful flush survive a crash; records
    /// appended after it may not, but recovery never surfaces them
    /// partially.
    pub fn flush(&self) -> JournalResult<()> {
        self.check_open()?;
        let mut state = self.shared.state.write();
        state.writer.flush()?;
        self.shared.stats.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes and closes the journal.
    ///
    /// Subsequent operations, including those of outstanding readers, fail
    /// with `Closed`. Closing twice is a no-op.
    pub fn close(&self) -> JournalResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.shared.state.write();
        state.writer.flush()?;
        info!(name = %self.shared.config.name, "journal closed");
        Ok(())
    }

    /// Journal statistics counters.
    pub fn stats(&self) -> &JournalStats {
        &self.shared.stats
    }

    fn check_open(&self) -> JournalResult<()> {
        if self.shared.is_closed() {
            Err(JournalError::Closed)
        } else {
            Ok(())
        }
    }

    fn append_to_tail(
        &self,
        state: &mut JournalState,
        asqn: Asqn,
        data: &[u8],
    ) -> JournalResult<Record> {
        if state.writer.is_full() {
            self.roll_over(state)?;
        }

        match state.writer.append(asqn, data) {
            Err(JournalError::SegmentFull { .. }) => {
                self.roll_over(state)?;
                state
                    .writer
                    .append(asqn, data)
                    .map_err(|err| self.entry_too_large(err))
            }
            other => other,
        }
    }

    /// Replication appends roll over exactly like local appends; the new
    /// segment's first index equals the writer's next index, so the
    /// record's index still lines up after the rollover.
    fn append_record_to_tail(
        &self,
        state: &mut JournalState,
        record: &Record,
    ) -> JournalResult<Record> {
        if state.writer.is_full() {
            self.roll_over(state)?;
        }

        match state.writer.append_record(record) {
            Err(JournalError::SegmentFull { .. }) => {
                self.roll_over(state)?;
                state
                    .writer
                    .append_record(record)
                    .map_err(|err| self.entry_too_large(err))
            }
            other => other,
        }
    }

    /// A fresh segment still cannot hold the frame: the record itself is
    /// too large for the configured segment size.
    fn entry_too_large(&self, err: JournalError) -> JournalError {
        match err {
            JournalError::SegmentFull { needed, .. } => JournalError::record_too_large(
                needed - FRAME_HEADER_SIZE,
                self.shared.config.max_entry_size,
            ),
            other => other,
        }
    }

    fn roll_over(&self, state: &mut JournalState) -> JournalResult<()> {
        state.writer.flush()?;
        let old = Arc::clone(state.writer.segment());
        old.seal();

        let next_id = old.id().next();
        let first_index = state.writer.next_index();
        let segment = create_segment(&self.shared.config, next_id, first_index)?;
        debug!(segment = %next_id, first_index, "rolled over to new segment");

        state.segments.insert(first_index, Arc::clone(&segment));
        state.writer = SegmentWriter::open(segment, self.shared.config.max_entry_size)?;
        self.shared
            .stats
            .segments_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn truncate_locked(&self, state: &mut JournalState, index: u64) -> JournalResult<()> {
        let head_first = *state
            .segments
            .keys()
            .next()
            .expect("journal has at least one segment");

        // Drop whole segments past the target; the head segment is always
        // retained, even when the target lies before it.
        let cut = index.saturating_add(1).max(head_first + 1);
        let removed = state.segments.split_off(&cut);

        let tail = Arc::clone(
            state
                .segments
                .values()
                .next_back()
                .expect("head segment is retained"),
        );
        let rebind = !Arc::ptr_eq(state.writer.segment(), &tail);

        for segment in removed.values() {
            debug!(segment = %segment.id(), "deleting truncated segment");
            segment.delete()?;
        }

        if rebind {
            tail.unseal();
            state.writer = SegmentWriter::open(Arc::clone(&tail), self.shared.config.max_entry_size)?;
        }
        state.writer.truncate(index)?;

        state.last_asqn = scan_last_asqn(
            &state.segments,
            self.shared.config.max_entry_size,
            state.writer.last_index(),
        )?;
        Ok(())
    }

    fn read_record_at(
        &self,
        state: &JournalState,
        index: u64,
    ) -> JournalResult<Option<Record>> {
        let Some((_, segment)) = state.segments.range(..=index).next_back() else {
            return Ok(None);
        };
        if index > segment.last_index() {
            return Ok(None);
        }
        let mut reader = segment.open_reader(self.shared.config.max_entry_size)?;
        reader.seek(index)?;
        reader.read_next()
    }

    fn record_append_stats(&self, record: &Record) {
        self.shared
            .stats
            .records_appended
            .fetch_add(1, Ordering::Relaxed);
        self.shared
            .stats
            .bytes_appended
            .fetch_add(record.data().len() as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("name", &self.shared.config.name)
            .field("first_index", &self.first_index())
            .field("last_index", &self.last_index())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Creates a new segment file from the journal configuration.
fn create_segment(
    config: &JournalConfig,
    id: SegmentId,
    first_index: u64,
) -> JournalResult<Arc<Segment>> {
    let descriptor = SegmentDescriptor::new(
        id,
        first_index,
        config.max_segment_size,
        config.max_entries,
    );
    let segment = Segment::create(config.segment_path(id), descriptor, config.index_density)?;
    Ok(Arc::new(segment))
}

/// Finds the sequence number of the last record at or before `up_to` that
/// carries one.
///
/// Walks segments from the tail; asqns are monotonic, so the first segment
/// that yields a specified asqn ends the search.
fn scan_last_asqn(
    segments: &BTreeMap<u64, Arc<Segment>>,
    max_entry_size: usize,
    up_to: u64,
) -> JournalResult<Asqn> {
    for segment in segments.values().rev() {
        if segment.first_index() > up_to || segment.is_empty() {
            continue;
        }

        let mut reader = segment.open_reader(max_entry_size)?;
        let mut last = Asqn::UNSPECIFIED;
        while let Some(record) = reader.read_next()? {
            if record.index() > up_to {
                break;
            }
            if record.asqn().is_specified() {
                last = record.asqn();
            }
        }
        if last.is_specified() {
            return Ok(last);
        }
    }
    Ok(Asqn::UNSPECIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &std::path::Path) -> JournalConfig {
        JournalConfig::new(dir)
            .with_max_segment_size(1024 * 1024)
            .with_max_entry_size(64 * 1024)
            .with_index_density(5)
    }

    #[test]
    fn test_open_creates_first_segment() {
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(test_config(tmp.path())).unwrap();

        assert!(journal.is_open());
        assert!(journal.is_empty());
        assert_eq!(journal.first_index(), 1);
        assert_eq!(journal.last_index(), 0);
        assert!(tmp.path().join("journal-1.log").exists());
    }

    #[test]
    fn test_close_rejects_operations() {
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(test_config(tmp.path())).unwrap();

        journal.append(b"TestData").unwrap();
        journal.close().unwrap();
        assert!(!journal.is_open());

        assert!(matches!(
            journal.append(b"TestData"),
            Err(JournalError::Closed)
        ));
        assert!(matches!(journal.flush(), Err(JournalError::Closed)));

        // Closing twice is fine.
        journal.close().unwrap();
    }

    #[test]
    fn test_stats_counters() {
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(test_config(tmp.path())).unwrap();

        journal.append(b"12345678").unwrap();
        journal.append(b"12345678").unwrap();
        journal.flush().unwrap();

        let stats = journal.stats();
        assert_eq!(stats.records_appended.load(Ordering::Relaxed), 2);
        assert_eq!(stats.bytes_appended.load(Ordering::Relaxed), 16);
        assert_eq!(stats.flushes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_corrupted_chain_detected() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());

        {
            let journal = Journal::open(config.clone()).unwrap();
            journal.append(b"TestData").unwrap();
            journal.close().unwrap();
        }

        // Fabricate a second segment whose id skips ahead.
        let descriptor = SegmentDescriptor::new(
            SegmentId::new(3),
            100,
            config.max_segment_size,
            config.max_entries,
        );
        Segment::create(
            config.segment_path(SegmentId::new(3)),
            descriptor,
            config.index_density,
        )
        .unwrap();

        let err = Journal::open(config).unwrap_err();
        assert!(matches!(err, JournalError::CorruptedJournal { .. }));
    }

    #[test]
    fn test_mismatched_descriptor_id_detected() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());

        // A file named for segment 1 whose descriptor claims segment 2.
        let descriptor = SegmentDescriptor::new(
            SegmentId::new(2),
            1,
            config.max_segment_size,
            config.max_entries,
        );
        Segment::create(
            config.segment_path(SegmentId::new(1)),
            descriptor,
            config.index_density,
        )
        .unwrap();

        let err = Journal::open(config).unwrap_err();
        assert!(matches!(err, JournalError::CorruptedJournal { .. }));
    }
}
