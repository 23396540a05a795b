//! Error types for the VoxStore volume cache.

use std::fmt;
use std::io;

/// The result type used throughout VoxStore.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for VoxStore operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred while reading or writing a block region.
    Io(io::Error),

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// The volume's dimension names could not be matched one-to-one
    /// against the requested output dimension names.
    DimensionMismatch(String),

    /// The backing file is malformed (bad magic, checksum, or element type).
    Corruption(String),

    /// A serialization or deserialization error occurred.
    Serialization(String),

    /// An internal invariant was violated.
    Internal(String),
}

impl Error {
    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Error::DimensionMismatch(msg.into())
    }

    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::DimensionMismatch(msg) => write!(f, "Dimension mismatch: {}", msg),
            Error::Corruption(msg) => write!(f, "File corruption: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_argument("block size must be >= 1");
        assert_eq!(err.to_string(), "Invalid argument: block size must be >= 1");

        let err = Error::dimension_mismatch("no output dimension named 'zspace'");
        assert!(err.to_string().contains("zspace"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
