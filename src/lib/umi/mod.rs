//! UMI (Unique Molecular Identifier) utilities.
//!
//! UMIs live in the read identifier as the suffix after a configured
//! delimiter; when a record's identifier carries no delimiter, the format
//! sampled from the first delimited identifier of the run supplies a
//! fixed-length suffix instead.
//!
//! Duplex UMIs carry two halves separated by a duplex delimiter; reads from
//! opposite strands of one molecule carry the halves swapped.

pub mod group_builder;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::errors::{FgdupError, Result};

/// Hamming distance between two equal-length UMI strings.
///
/// Returns `None` when the lengths differ; fuzzy matching is only defined
/// over equal-length UMIs.
#[must_use]
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    let distance =
        a.bytes().zip(b.bytes()).filter(|(x, y)| !x.eq_ignore_ascii_case(y)).count() as u32;
    Some(distance)
}

/// True when two UMIs are within `tolerance` mismatches (equal length only).
#[must_use]
pub fn within_mismatches(a: &str, b: &str, tolerance: u32) -> bool {
    hamming_distance(a, b).is_some_and(|d| d <= tolerance)
}

/// Splits a duplex UMI into its two halves at the duplex delimiter.
///
/// Returns `(umi, None)` when the delimiter is absent.
#[must_use]
pub fn split_duplex(umi: &str, delimiter: char) -> (&str, Option<&str>) {
    match umi.split_once(delimiter) {
        Some((first, second)) => (first, Some(second)),
        None => (umi, None),
    }
}

/// Tests whether two UMIs form complementary duplex halves.
///
/// For two full duplex UMIs `a1<d>a2` and `b1<d>b2` this requires the first
/// half of each to match the second half of the other within `tolerance`.
/// When one side carries only a single half (its other end decayed or was
/// never read), it must match the opposite half of the full UMI.
#[must_use]
pub fn duplex_complement_match(a: &str, b: &str, delimiter: char, tolerance: u32) -> bool {
    let (a1, a2) = split_duplex(a, delimiter);
    let (b1, b2) = split_duplex(b, delimiter);

    match (a2, b2) {
        (Some(a2), Some(b2)) => {
            within_mismatches(a1, b2, tolerance) && within_mismatches(a2, b1, tolerance)
        }
        (Some(a2), None) => {
            // b is a bare half; it can stand in for either complementary half
            within_mismatches(a2, b1, tolerance) || within_mismatches(a1, b1, tolerance)
        }
        (None, Some(b2)) => {
            within_mismatches(a1, b2, tolerance) || within_mismatches(a1, b1, tolerance)
        }
        (None, None) => false,
    }
}

/// Extracts UMIs from read identifiers.
///
/// Delimited identifiers yield the suffix after the last delimiter. The first
/// delimited identifier seen also fixes the expected UMI length, so later
/// identifiers missing the delimiter can still yield a fixed-length suffix.
pub struct UmiExtractor {
    delimiter: char,
    sampled_length: Option<usize>,
}

impl UmiExtractor {
    /// Creates an extractor using the given identifier delimiter.
    #[must_use]
    pub fn new(delimiter: char) -> Self {
        Self { delimiter, sampled_length: None }
    }

    /// Extracts the UMI from a read identifier.
    ///
    /// Returns `None` when no delimiter is present and no format has been
    /// sampled yet, or when the candidate suffix is empty.
    pub fn extract(&mut self, name: &str) -> Option<String> {
        if let Some(idx) = name.rfind(self.delimiter) {
            let umi = &name[idx + self.delimiter.len_utf8()..];
            if umi.is_empty() {
                return None;
            }
            if self.sampled_length.is_none() {
                self.sampled_length = Some(umi.len());
                info!("Sampled UMI format: {}-base suffix after '{}'", umi.len(), self.delimiter);
            }
            return Some(umi.to_ascii_uppercase());
        }

        // No delimiter: fall back to the sampled fixed-length suffix.
        let length = self.sampled_length?;
        if name.len() < length {
            return None;
        }
        Some(name[name.len() - length..].to_ascii_uppercase())
    }
}

/// An allow-list of defined UMIs loaded from a file of literal UMI strings.
#[derive(Clone)]
pub struct DefinedUmis {
    umis: Vec<String>,
}

impl DefinedUmis {
    /// Loads defined UMIs from a file with one UMI per line.
    ///
    /// # Errors
    /// Returns [`FgdupError::InvalidFileFormat`] when the file cannot be read
    /// or contains no UMIs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref).map_err(|e| FgdupError::InvalidFileFormat {
            file_type: "UMI list".to_string(),
            path: path_ref.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut umis = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| FgdupError::InvalidFileFormat {
                file_type: "UMI list".to_string(),
                path: path_ref.display().to_string(),
                reason: e.to_string(),
            })?;
            let umi = line.trim();
            if !umi.is_empty() {
                umis.push(umi.to_ascii_uppercase());
            }
        }

        if umis.is_empty() {
            return Err(FgdupError::InvalidFileFormat {
                file_type: "UMI list".to_string(),
                path: path_ref.display().to_string(),
                reason: "no UMIs found".to_string(),
            });
        }

        info!("Loaded {} defined UMIs from {}", umis.len(), path_ref.display());
        Ok(Self { umis })
    }

    /// Creates an allow-list from literal UMI strings (used by tests).
    #[must_use]
    pub fn from_umis(umis: Vec<String>) -> Self {
        Self { umis: umis.into_iter().map(|u| u.to_ascii_uppercase()).collect() }
    }

    /// Resolves an observed UMI to its canonical defined UMI.
    ///
    /// Returns the unique defined UMI within `permitted_diff` mismatches, or
    /// `None` when the observed UMI is unknown or ambiguous (matches two or
    /// more entries); callers fall back to unconstrained clustering.
    #[must_use]
    pub fn resolve(&self, umi: &str, permitted_diff: u32) -> Option<&str> {
        let mut found: Option<&str> = None;
        for candidate in &self.umis {
            if within_mismatches(candidate, umi, permitted_diff) {
                if found.is_some() {
                    return None; // ambiguous
                }
                found = Some(candidate);
            }
        }
        found
    }
}
