//! Persistence error types.

use std::fmt;

use crate::protocol::{DecodeError, EncodeError};

/// Errors that can occur during persistence operations.
#[derive(Debug)]
pub enum PersistenceError {
    /// IO error
    Io(std::io::Error),
    /// File starts with a magic string this build does not know
    UnknownVersion(String),
    /// Stored packet failed to decode
    Decode(DecodeError),
    /// Packet could not be encoded for storage
    Encode(EncodeError),
    /// Data corruption detected
    Corruption(String),
    /// File exceeds the configured maximum size
    TooLarge { size: u64, max: u64 },
    /// A value does not fit the on-disk field that holds it
    Limit(&'static str),
    /// File was not opened in the mode the operation needs
    NotOpen,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::UnknownVersion(magic) => write!(f, "unknown file version '{}'", magic),
            Self::Decode(e) => write!(f, "stored packet is invalid: {}", e),
            Self::Encode(e) => write!(f, "cannot encode packet: {}", e),
            Self::Corruption(e) => write!(f, "data corruption: {}", e),
            Self::TooLarge { size, max } => {
                write!(f, "file is {} bytes, more than the maximum of {}", size, max)
            }
            Self::Limit(what) => write!(f, "{} exceeds the file format limit", what),
            Self::NotOpen => write!(f, "file is not open for this operation"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<DecodeError> for PersistenceError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<EncodeError> for PersistenceError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
