//! IPC error types.

use std::fmt;
use tabwire_core::DataError;
use tabwire_protocol::{ProtocolError, UsageError};
use thiserror::Error;

/// Kind of block listed in a file footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Dictionary,
    RecordBatch,
}

/// Byte region a decode error was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Message starting at this offset of a stream.
    Message { offset: u64 },
    /// Leading magic of a file.
    FileHeader,
    /// Trailing magic, footer length or footer of a file.
    Footer,
    /// A block listed in the footer.
    Block { kind: BlockKind, index: usize },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Message { offset } => write!(f, "message at offset {}", offset),
            Location::FileHeader => write!(f, "file header"),
            Location::Footer => write!(f, "file footer"),
            Location::Block {
                kind: BlockKind::Dictionary,
                index,
            } => write!(f, "dictionary block {}", index),
            Location::Block {
                kind: BlockKind::RecordBatch,
                index,
            } => write!(f, "record batch block {}", index),
        }
    }
}

/// Errors surfaced by readers and writers.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error in {location}: {source}")]
    Decode {
        location: Location,
        source: ProtocolError,
    },

    #[error("encode error: {0}")]
    Encode(ProtocolError),

    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

impl IpcError {
    pub fn decode(location: Location, source: impl Into<ProtocolError>) -> Self {
        IpcError::Decode {
            location,
            source: source.into(),
        }
    }

    /// Malformed input.
    pub fn is_decode(&self) -> bool {
        matches!(self, IpcError::Decode { .. })
    }

    /// Caller misuse.
    pub fn is_usage(&self) -> bool {
        matches!(self, IpcError::Usage(_))
    }

    /// Failure of the underlying sink or source.
    pub fn is_io(&self) -> bool {
        matches!(self, IpcError::Io(_))
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            IpcError::Decode { location, .. } => Some(*location),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = IpcError::decode(Location::FileHeader, ProtocolError::MissingSchema);
        assert!(err.is_decode());
        assert!(!err.is_usage());
        assert_eq!(err.location(), Some(Location::FileHeader));
        assert!(err.to_string().contains("file header"));

        let err: IpcError = UsageError::Closed.into();
        assert!(err.is_usage());
        assert_eq!(err.location(), None);

        let err: IpcError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_io());
    }

    #[test]
    fn test_location_display() {
        let loc = Location::Block {
            kind: BlockKind::RecordBatch,
            index: 3,
        };
        assert_eq!(loc.to_string(), "record batch block 3");
        assert_eq!(
            Location::Message { offset: 24 }.to_string(),
            "message at offset 24"
        );
    }
}
