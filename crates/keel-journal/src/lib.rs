//! # keel-journal
//!
//! Durable append-only segmented journal.
//!
//! The journal stores an ordered sequence of opaque binary records across a
//! series of fixed-cap segment files. It is the lowest layer of a
//! consensus-replicated log and provides:
//!
//! - Dense, gapless, 1-based record indexing
//! - Per-record CRC32 integrity
//! - Crash recovery that discards torn or corrupted tails
//! - Tail truncation and head reset
//! - A sparse in-memory index to shortcut random-access seeks
//!
//! One writer thread appends through [`Journal`]; any number of
//! [`JournalReader`] cursors iterate concurrently.
//!
//! ## Example
//!
//! ```no_run
//! use keel_journal::{Journal, JournalConfig};
//!
//! # fn main() -> keel_journal::JournalResult<()> {
//! let journal = Journal::open(JournalConfig::new("data/journal"))?;
//! let record = journal.append(b"hello")?;
//! assert_eq!(record.index(), 1);
//!
//! let mut reader = journal.open_reader();
//! while let Some(record) = reader.next()? {
//!     println!("{}: {} bytes", record.index(), record.data().len());
//! }
//! journal.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod journal;
pub mod reader;
pub mod record;
pub mod segment;
pub mod writer;

pub use config::JournalConfig;
pub use error::{JournalError, JournalResult};
pub use journal::{Journal, JournalStats};
pub use reader::JournalReader;
pub use record::Record;

pub use keel_common::types::{Asqn, SegmentId};
