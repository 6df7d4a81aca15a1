//! Protocol error types.
//!
//! [`ProtocolError`] covers malformed input: anything a reader finds wrong
//! with bytes it was handed. [`UsageError`] covers callers driving a writer
//! or resolver incorrectly. The two never overlap.

use crate::message::{MessageKind, MetadataVersion};
use tabwire_core::DataError;
use thiserror::Error;

/// Malformed or unsupported input encountered while decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("negative length in frame prefix: {0}")]
    NegativeLength(i32),

    #[error("metadata too large: {size} bytes (max {max})")]
    MetadataTooLarge { size: usize, max: usize },

    #[error("body too large: {size} bytes")]
    BodyTooLarge { size: i64 },

    #[error("truncated {region}: expected {expected} bytes, got {actual}")]
    Truncated {
        region: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message kind tag: {0}")]
    UnknownMessageKind(u8),

    #[error("unsupported message kind: {0}")]
    UnsupportedMessageKind(MessageKind),

    #[error("unexpected message kind: expected {expected}, got {actual}")]
    UnexpectedMessageKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("unsupported metadata version: {0}")]
    UnsupportedVersion(i16),

    #[error("unsupported body compression: {0}")]
    UnsupportedCompression(String),

    #[error("body length mismatch: metadata declares {declared}, frame carries {actual}")]
    BodyLengthMismatch { declared: u64, actual: u64 },

    #[error("buffer [{offset}, +{length}) outside body of {body_length} bytes")]
    BufferOutOfRange {
        offset: u64,
        length: u64,
        body_length: u64,
    },

    #[error("batch layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("batch references undefined dictionary {0}")]
    UndefinedDictionary(i64),

    #[error("dictionary batch for id {0} not present in schema")]
    UnknownDictionaryId(i64),

    #[error("delta dictionary batch for id {0} has no base dictionary")]
    DeltaWithoutBase(i64),

    #[error("stream does not start with a schema message")]
    MissingSchema,

    #[error("invalid magic at {location}: {found:?}")]
    InvalidMagic {
        location: &'static str,
        found: Vec<u8>,
    },

    #[error("invalid footer: {0}")]
    InvalidFooter(String),

    #[error("index {index} out of range for {count} blocks")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("invalid data: {0}")]
    Data(#[from] DataError),
}

impl ProtocolError {
    /// Returns whether more input could have avoided the error.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::Truncated { .. })
    }
}

/// Misuse of a writer, reader or option set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("can provide at most one of options and use_legacy_format")]
    ConflictingOptions,

    #[error("cannot write metadata version {0}; use V4 or V5")]
    UnsupportedWriteVersion(MetadataVersion),

    #[error("writer is not open")]
    NotOpen,

    #[error("writer is already open")]
    AlreadyOpen,

    #[error("writer is closed")]
    Closed,

    #[error("batch schema does not match writer schema: expected [{expected}], got [{actual}]")]
    SchemaMismatch { expected: String, actual: String },

    #[error("dictionary {id} changed but replacement is not allowed here")]
    DictionaryReplacement { id: i64 },

    #[error("columns sharing dictionary {id} carry different dictionaries")]
    ConflictingDictionaries { id: i64 },
}
