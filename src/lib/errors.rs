//! Custom error types for fgdup operations.

use thiserror::Error;

/// Result type alias for fgdup operations
pub type Result<T> = std::result::Result<T, FgdupError>;

/// Error type for fgdup operations
#[derive(Error, Debug)]
pub enum FgdupError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM", "UMI list")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Required reference sequence not found
    #[error("Reference sequence '{ref_name}' not found in header")]
    ReferenceNotFound {
        /// The reference sequence name
        ref_name: String,
    },

    /// Input is not coordinate sorted
    #[error("Input BAM must be coordinate sorted (header SO tag is '{found}')")]
    NotCoordinateSorted {
        /// The sort order found in the header
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter() {
        let error = FgdupError::InvalidParameter {
            parameter: "group-size".to_string(),
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid parameter 'group-size'"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_invalid_file_format() {
        let error = FgdupError::InvalidFileFormat {
            file_type: "UMI list".to_string(),
            path: "/path/to/umis.txt".to_string(),
            reason: "empty file".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid UMI list file"));
        assert!(msg.contains("empty file"));
    }

    #[test]
    fn test_not_coordinate_sorted() {
        let error = FgdupError::NotCoordinateSorted { found: "queryname".to_string() };
        assert!(format!("{error}").contains("coordinate sorted"));
    }
}
