//! Error types for Metrichist

use thiserror::Error;

/// Result type alias for Metrichist operations
pub type Result<T> = std::result::Result<T, HistError>;

/// Metrichist error types
#[derive(Error, Debug)]
pub enum HistError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment contents could not be decoded
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A segment or record extends past the logical end of file
    #[error("Truncated data: offset {offset} exceeds end {end}")]
    Truncated { offset: u64, end: u64 },

    /// Value could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Not a metrichist file
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// File written by an incompatible codec version
    #[error("Unsupported version: v{major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// File kind flag is not the list encoding
    #[error("Unsupported file kind: {0:#x}")]
    WrongKind(u32),

    /// Mutation attempted on a file opened read-only
    #[error("File is opened read-only")]
    ReadOnly,
}

impl HistError {
    /// Check if error came from decoding file contents
    pub fn is_decoding(&self) -> bool {
        matches!(
            self,
            HistError::Decoding(_)
                | HistError::ChecksumMismatch { .. }
                | HistError::Truncated { .. }
                | HistError::Compression(_)
        )
    }

    /// Check if error indicates the caller used the file incorrectly
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            HistError::InvalidFormat(_)
                | HistError::UnsupportedVersion { .. }
                | HistError::WrongKind(_)
                | HistError::ReadOnly
        )
    }

    pub(crate) fn decoding(msg: impl Into<String>) -> Self {
        HistError::Decoding(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(HistError::ChecksumMismatch { expected: 1, actual: 2 }.is_decoding());
        assert!(HistError::Truncated { offset: 10, end: 5 }.is_decoding());
        assert!(!HistError::ReadOnly.is_decoding());
        assert!(HistError::ReadOnly.is_usage());
        assert!(HistError::WrongKind(0).is_usage());
        assert!(!HistError::Decoding("x".into()).is_usage());
    }
}
