// vim: tw=80
//! Consistency tracking for redundant raid groups
//!
//! Records which chunks of which positions need rebuilding, which positions
//! are rebuild logging, and how far each position's rebuild has progressed.
//! Also coordinates error-handling thresholds and bookkeeping changes with a
//! peer storage processor.

// I don't find this lint very helpful
#![allow(clippy::type_complexity)]

// Errno names are upper case by convention
#![allow(clippy::upper_case_acronyms)]

pub mod checkpoint;
pub mod cluster;
pub mod condition;
pub mod config;
pub mod edge;
pub mod emeh;
pub mod event_log;
pub mod geometry;
pub mod metadata;
pub mod needs_rebuild;
pub mod raid_group;
pub mod rebuild;
pub mod rebuild_logging;
pub mod status;
pub mod types;
pub mod util;

pub use crate::types::*;
