//! Journal configuration.
//!
//! This module provides configuration options for the segmented journal.

use std::path::{Path, PathBuf};

use keel_common::constants::{
    DEFAULT_INDEX_DENSITY, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_SIZE, DEFAULT_MAX_SEGMENT_SIZE,
    DESCRIPTOR_SIZE, FRAME_HEADER_SIZE, RECORD_METADATA_SIZE,
};
use keel_common::types::SegmentId;

/// Configuration for a segmented journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory where segment files are stored.
    pub directory: PathBuf,

    /// Journal name, used as the segment file name prefix.
    pub name: String,

    /// Size cap of each segment file in bytes.
    pub max_segment_size: u64,

    /// Maximum size of a single record body in bytes.
    pub max_entry_size: usize,

    /// Maximum number of records per segment.
    pub max_entries: u64,

    /// Sparse index density: one offset is retained every k-th record.
    pub index_density: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/journal"),
            name: "journal".to_string(),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
            index_density: DEFAULT_INDEX_DENSITY,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with the specified directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Sets the journal name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the segment size cap.
    #[must_use]
    pub fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the maximum record body size.
    #[must_use]
    pub fn with_max_entry_size(mut self, size: usize) -> Self {
        self.max_entry_size = size;
        self
    }

    /// Sets the maximum number of records per segment.
    #[must_use]
    pub fn with_max_entries(mut self, entries: u64) -> Self {
        self.max_entries = entries;
        self
    }

    /// Sets the sparse index density.
    #[must_use]
    pub fn with_index_density(mut self, density: u64) -> Self {
        self.index_density = density;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("journal name must not be empty".to_string());
        }

        if self.index_density == 0 {
            return Err("index density must be positive".to_string());
        }

        if self.max_entries == 0 {
            return Err("max entries must be positive".to_string());
        }

        if self.max_entry_size <= RECORD_METADATA_SIZE {
            return Err(format!(
                "max entry size must exceed the {} byte record metadata",
                RECORD_METADATA_SIZE
            ));
        }

        let min_size = (DESCRIPTOR_SIZE + FRAME_HEADER_SIZE + self.max_entry_size) as u64;
        if self.max_segment_size < min_size {
            return Err(format!(
                "max segment size {} cannot hold a maximum-sized entry (need at least {})",
                self.max_segment_size, min_size
            ));
        }

        Ok(())
    }

    /// Returns the segment file path for a given segment ID.
    pub fn segment_path(&self, segment_id: SegmentId) -> PathBuf {
        self.directory
            .join(format!("{}-{}.log", self.name, segment_id))
    }

    /// Parses a segment ID from a file path.
    ///
    /// Returns `None` for files that do not follow the `<name>-<id>.log`
    /// naming scheme of this journal.
    pub fn parse_segment_id(&self, path: &Path) -> Option<SegmentId> {
        if path.extension()?.to_str()? != "log" {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let id = stem.strip_prefix(&self.name)?.strip_prefix('-')?;
        id.parse::<u64>().ok().map(SegmentId::new)
    }
}
