#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # fgdup - UMI-aware duplicate collapsing library
//!
//! Marks and collapses duplicate sequencing fragments (PCR/optical duplicates
//! and UMI-tagged replicate reads) in coordinate-sorted aligned-read data.
//!
//! ## Overview
//!
//! The core pipeline streams position-sorted records through a windowed,
//! eviction-driven cache and a chain of fuzzy merge passes:
//!
//! - **[`fragment_coords`]** - canonical 5' fragment keys for reads and mates
//! - **[`read_cache`]** - windowed, position-bucketed cache with an eviction
//!   policy that emits fully-resolved coordinate groups
//! - **[`group_builder`]** / **[`umi`]** - UMI-aware clustering of
//!   coordinate-matched reads
//! - **[`merge`]** - duplex, jitter, poly-tail and platform-distance passes
//! - **[`partition`]** - genome partitioning and the worker-pool execution
//!   model
//!
//! ## Utilities
//!
//! - **[`bam_io`]** - BAM reader/writer construction
//! - **[`sam`]** - record-level position utilities and the test builder
//! - **[`metrics`]** - structured metrics and TSV output
//! - **[`logging`]** / **[`progress`]** - formatted logging helpers
//! - **[`validation`]** - parameter and file validation
//! - **[`consensus`]** - the external consensus-builder boundary

pub mod bam_io;
pub mod consensus;
pub mod errors;
pub mod fragment_coords;
pub mod group_builder;
pub mod header;
pub mod logging;
pub mod merge;
pub mod metrics;
pub mod partition;
pub mod progress;
pub mod read_cache;
pub mod read_info;
pub mod sam;
pub mod umi;
pub mod validation;

// Re-export the core data model for convenient access
pub use fragment_coords::FragmentCoords;
pub use read_cache::ReadCache;
pub use read_info::{DuplicateGroup, Fragment, ReadInfo};
