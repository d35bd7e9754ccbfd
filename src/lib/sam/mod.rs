//! SAM/BAM record utilities.
//!
//! - [`record_utils`] - position and CIGAR helpers for individual records
//! - [`builder`] - fluent record builder for tests

pub mod builder;
pub mod record_utils;

pub use record_utils::{
    alignment_end, mate_unclipped_end, mate_unclipped_five_prime_position, mate_unclipped_start,
    mean_base_quality, parse_cigar_string, unclipped_end, unclipped_five_prime_position,
    unclipped_start,
};
