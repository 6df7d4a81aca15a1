//! # tabwire-protocol
//!
//! Message framing for the tabwire columnar IPC format.
//!
//! This crate provides:
//! - Length-prefixed envelopes in legacy and current framing
//! - JSON message metadata and the message type registry
//! - Depth-first record batch body layout
//! - Dictionary tracking for readers and writers
//! - An incremental decoder usable from blocking and async readers
//! - Write options and their resolution against deployment defaults

pub mod codec;
pub mod dictionary;
pub mod error;
pub mod frame;
pub mod layout;
pub mod message;
pub mod options;

pub use codec::{Decoded, MessageDecoder, MessageEncoder};
pub use dictionary::{DictionaryMemo, DictionaryTracker, DictionaryUpdate, PendingDictionary};
pub use error::{ProtocolError, UsageError};
pub use frame::{
    decode_prefix, Frame, FrameLengths, FramingEpoch, Prefix, ALIGNMENT, CONTINUATION_MARKER,
    MAX_METADATA_SIZE,
};
pub use layout::{decode_columns, decode_record_batch, encode_columns, encode_record_batch};
pub use message::{
    BufferSpec, DictionaryBatchHeader, FieldNode, Message, MessageHeader, MessageKind,
    MessageMetadata, MetadataVersion, RecordBatchHeader, TensorDim, TensorHeader,
};
pub use options::{
    resolve_write_options, FormatConfig, WriteOptions, LEGACY_FORMAT_ENV, LEGACY_METADATA_ENV,
};

/// Leading magic of the file format, padded to 8 bytes.
pub const FILE_MAGIC_PADDED: [u8; 8] = *b"ARROW1\0\0";

/// Trailing magic of the file format.
pub const FILE_MAGIC: [u8; 6] = *b"ARROW1";
