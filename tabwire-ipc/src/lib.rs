//! # tabwire-ipc
//!
//! Readers and writers for the tabwire columnar IPC format.
//!
//! This crate provides:
//! - Sequential streams over any `Read`/`Write`, blocking or tokio
//! - Random-access files with a footer index
//! - Single-message helpers for schemas, batches and tensors
//! - A tabular round trip between data frames and stream bytes
//!
//! The `new_*` and `open_*` functions are the usual entry points. Writers
//! built through them resolve their options once, at construction, from the
//! arguments and the process environment.

pub mod error;
pub mod file;
pub mod footer;
pub mod reader;
pub mod stream;
pub mod stream_async;
pub mod tabular;
pub mod writer;

pub use error::{BlockKind, IpcError, Location};
pub use file::{FileReader, FileWriter};
pub use footer::{Block, Footer};
pub use reader::{
    get_record_batch_size, get_tensor_size, read_message, read_record_batch, read_schema,
    read_tensor, write_message, write_tensor, MessageReader, ReadMessage,
};
pub use stream::{StreamReader, StreamWriter};
pub use stream_async::{AsyncStreamReader, AsyncStreamWriter};
pub use tabular::{deserialize_dataframe, serialize_dataframe};
pub use writer::WriteStats;

use std::io::{Read, Seek, Write};
use tabwire_core::SchemaRef;
use tabwire_protocol::{resolve_write_options, FormatConfig, WriteOptions};

/// Opens a stream writer on `sink` and writes the schema.
///
/// At most one of `use_legacy_format` and `options` may be given. With
/// neither, framing and metadata version follow the environment.
pub fn new_stream<W: Write>(
    sink: W,
    schema: impl Into<SchemaRef>,
    use_legacy_format: Option<bool>,
    options: Option<WriteOptions>,
) -> Result<StreamWriter<W>, IpcError> {
    new_stream_with_config(sink, schema, use_legacy_format, options, &FormatConfig::from_env())
}

/// [`new_stream`] with explicit format defaults instead of the environment.
pub fn new_stream_with_config<W: Write>(
    sink: W,
    schema: impl Into<SchemaRef>,
    use_legacy_format: Option<bool>,
    options: Option<WriteOptions>,
    config: &FormatConfig,
) -> Result<StreamWriter<W>, IpcError> {
    let options = resolve_write_options(options, use_legacy_format, config)?;
    StreamWriter::try_new(sink, schema, options)
}

/// Opens a stream reader, reading the schema message.
pub fn open_stream<R: Read>(source: R) -> Result<StreamReader<R>, IpcError> {
    StreamReader::try_new(source)
}

/// Opens a file writer on `sink` and writes the magic and schema.
pub fn new_file<W: Write>(
    sink: W,
    schema: impl Into<SchemaRef>,
    use_legacy_format: Option<bool>,
    options: Option<WriteOptions>,
) -> Result<FileWriter<W>, IpcError> {
    new_file_with_config(sink, schema, use_legacy_format, options, &FormatConfig::from_env())
}

/// [`new_file`] with explicit format defaults instead of the environment.
pub fn new_file_with_config<W: Write>(
    sink: W,
    schema: impl Into<SchemaRef>,
    use_legacy_format: Option<bool>,
    options: Option<WriteOptions>,
    config: &FormatConfig,
) -> Result<FileWriter<W>, IpcError> {
    let options = resolve_write_options(options, use_legacy_format, config)?;
    FileWriter::try_new(sink, schema, options)
}

/// Opens a file reader. `footer_offset` marks where the file ends when it
/// is followed by other data.
pub fn open_file<R: Read + Seek>(
    source: R,
    footer_offset: Option<u64>,
) -> Result<FileReader<R>, IpcError> {
    FileReader::try_new(source, footer_offset)
}
