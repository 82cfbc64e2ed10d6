//! Journal segments.
//!
//! A segment couples one fixed-cap file with its descriptor, its sparse
//! index, and the committed read boundary shared between the writer and all
//! readers of that segment.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use keel_common::types::SegmentId;

use crate::descriptor::SegmentDescriptor;
use crate::error::JournalResult;
use crate::index::SparseIndex;
use crate::reader::SegmentReader;

/// One segment of the journal.
///
/// The segment itself holds only shared metadata; appending goes through a
/// [`crate::writer::SegmentWriter`] and reading through [`SegmentReader`]s,
/// each with their own file handle. Readers never observe bytes past the
/// committed `last_index` published here.
pub struct Segment {
    path: PathBuf,
    descriptor: SegmentDescriptor,
    index: RwLock<SparseIndex>,
    /// Index of the last committed record, `first_index - 1` when empty.
    last_index: AtomicU64,
    /// Bumped on every tail truncation so readers drop cached positions.
    generation: AtomicU64,
    sealed: AtomicBool,
}

impl Segment {
    /// Creates a new segment file.
    ///
    /// The descriptor is written and flushed before any frame can follow,
    /// and the file is extended to its full size so the unwritten region
    /// reads as zeros (the zero length word terminates scans).
    pub fn create(
        path: impl AsRef<Path>,
        descriptor: SegmentDescriptor,
        index_density: u64,
    ) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&descriptor.encode())?;
        file.set_len(descriptor.max_segment_size())?;
        file.sync_all()?;

        Ok(Self {
            path,
            index: RwLock::new(SparseIndex::new(index_density)),
            last_index: AtomicU64::new(descriptor.first_index() - 1),
            generation: AtomicU64::new(0),
            descriptor,
            sealed: AtomicBool::new(false),
        })
    }

    /// Opens an existing segment file, validating its descriptor.
    ///
    /// The committed `last_index` starts out empty; the journal publishes
    /// the real boundary after scanning (tail segment) or from the segment
    /// chain (sealed segments).
    pub fn open(path: impl AsRef<Path>, index_density: u64) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).open(&path)?;
        let mut header = [0u8; SegmentDescriptor::SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let descriptor = SegmentDescriptor::decode(&header)?;

        Ok(Self {
            path,
            index: RwLock::new(SparseIndex::new(index_density)),
            last_index: AtomicU64::new(descriptor.first_index() - 1),
            generation: AtomicU64::new(0),
            descriptor,
            sealed: AtomicBool::new(false),
        })
    }

    /// Returns the segment identifier.
    #[inline]
    pub fn id(&self) -> SegmentId {
        self.descriptor.segment_id()
    }

    /// Returns the segment descriptor.
    #[inline]
    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    /// Index of the first record of this segment.
    #[inline]
    pub fn first_index(&self) -> u64 {
        self.descriptor.first_index()
    }

    /// Index of the last committed record, or `first_index - 1` when empty.
    #[inline]
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    /// Publishes a new committed read boundary.
    pub(crate) fn set_last_index(&self, index: u64) {
        self.last_index.store(index, Ordering::Release);
    }

    /// Whether the segment holds no committed records.
    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    /// Truncation generation; changes whenever frames were rewritten.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidates cached reader positions after a truncation.
    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// The sparse index of this segment.
    pub(crate) fn sparse_index(&self) -> &RwLock<SparseIndex> {
        &self.index
    }

    /// Marks the segment as sealed; sealed segments accept no more writes.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Reopens a sealed segment for writing after a tail truncation.
    pub(crate) fn unseal(&self) {
        self.sealed.store(false, Ordering::Release);
    }

    /// Whether the segment is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Opens an independent reader over this segment.
    pub fn open_reader(self: &Arc<Self>, max_entry_size: usize) -> JournalResult<SegmentReader> {
        SegmentReader::open(Arc::clone(self), max_entry_size)
    }

    /// Removes the segment file and makes the segment unreadable.
    ///
    /// Readers still holding this segment observe it as empty and resolve
    /// their position against the journal again.
    pub fn delete(&self) -> JournalResult<()> {
        self.seal();
        self.set_last_index(self.first_index() - 1);
        self.bump_generation();
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id())
            .field("path", &self.path)
            .field("first_index", &self.first_index())
            .field("last_index", &self.last_index())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
