//! Input validation utilities for parameters and files.
//!
//! Standardized validation with clear error messages, used by the command
//! layer before any processing starts.

use anyhow::{Result, bail};
use noodles::sam::alignment::record::data::field::Tag;
use std::fmt::Display;
use std::path::Path;

/// Validates that a file exists, with a descriptive error message.
///
/// # Arguments
/// * `path` - Path to the file to check
/// * `description` - Human-readable description used in the error message
///
/// # Errors
/// Returns an error if the file does not exist or is not a regular file.
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        bail!("{} does not exist: {}", description, path_ref.display());
    }
    if !path_ref.is_file() {
        bail!("{} is not a file: {}", description, path_ref.display());
    }
    Ok(())
}

/// Validates that a tag string is exactly two characters.
///
/// # Errors
/// Returns an error if the tag is not exactly 2 ASCII characters.
pub fn validate_tag(tag: &str, name: &str) -> Result<[u8; 2]> {
    let bytes = tag.as_bytes();
    if bytes.len() != 2 {
        bail!("{} must be exactly 2 characters, got '{}'", name, tag);
    }
    Ok([bytes[0], bytes[1]])
}

/// Convert a string tag to a noodles [`Tag`].
///
/// # Errors
/// Returns an error if the tag is not exactly 2 characters.
///
/// # Example
/// ```
/// use fgdup_lib::validation::string_to_tag;
///
/// let tag = string_to_tag("MI", "molecule tag").unwrap();
/// ```
pub fn string_to_tag(tag: &str, name: &str) -> Result<Tag> {
    let tag_array = validate_tag(tag, name)?;
    Ok(Tag::from(tag_array))
}

/// Validates that a value is strictly positive.
///
/// # Errors
/// Returns an error if `value <= T::default()`.
pub fn validate_positive<T: Ord + Display + Default>(value: T, name: &str) -> Result<()> {
    if value <= T::default() {
        bail!("{} must be > 0, got {}", name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_exists_missing() {
        let result = validate_file_exists("/no/such/file.bam", "Input BAM");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Input BAM does not exist"));
    }

    #[test]
    fn test_validate_tag() {
        assert_eq!(validate_tag("MI", "tag").unwrap(), *b"MI");
        assert!(validate_tag("ABC", "tag").is_err());
        assert!(validate_tag("A", "tag").is_err());
    }

    #[test]
    fn test_string_to_tag() {
        let tag = string_to_tag("RX", "umi tag").unwrap();
        assert_eq!(tag, Tag::from(*b"RX"));
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u32, "group-size").is_ok());
        assert!(validate_positive(0u32, "group-size").is_err());
    }
}
