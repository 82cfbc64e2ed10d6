//! # keel-common
//!
//! Common types and constants for the Keel journal.
//!
//! This crate provides the foundational pieces shared by the journal engine
//! and its embedders:
//!
//! - **Types**: typed identifiers (`Asqn`, `SegmentId`)
//! - **Constants**: on-disk format constants and default limits
//!
//! ## Example
//!
//! ```rust
//! use keel_common::types::{Asqn, SegmentId};
//!
//! let asqn = Asqn::new(42);
//! assert!(asqn.is_specified());
//! assert!(!Asqn::UNSPECIFIED.is_specified());
//!
//! let segment = SegmentId::new(1);
//! assert_eq!(segment.next(), SegmentId::new(2));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{Asqn, SegmentId};
