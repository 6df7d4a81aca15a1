//! Writer building blocks shared by the stream, file and async writers.
//!
//! [`WriterCore`] owns the lifecycle and dictionary bookkeeping and turns
//! each batch into the messages that must go out, in order. The concrete
//! writers only differ in where the bytes go and what they remember about
//! them.

use crate::error::IpcError;
use crate::footer::Block;
use bytes::BytesMut;
use std::io::Write;
use tabwire_core::{RecordBatch, SchemaRef};
use tabwire_protocol::{
    encode_record_batch, DictionaryTracker, FrameLengths, Message, MessageEncoder, MessageHeader,
    UsageError, WriteOptions,
};
use tracing::debug;

/// Counters kept by every writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Messages written, end-of-stream marker excluded.
    pub messages: u64,
    /// RecordBatch messages written.
    pub record_batches: u64,
    /// DictionaryBatch messages written, deltas included.
    pub dictionary_batches: u64,
    /// DictionaryBatch messages flagged as deltas.
    pub delta_dictionary_batches: u64,
    /// Total bytes handed to the sink.
    pub bytes_written: u64,
}

impl WriteStats {
    pub(crate) fn record_message(&mut self, message: &Message, lengths: FrameLengths) {
        self.messages += 1;
        self.bytes_written += lengths.total() as u64;
        match &message.header {
            MessageHeader::RecordBatch(_) => self.record_batches += 1,
            MessageHeader::DictionaryBatch(header) => {
                self.dictionary_batches += 1;
                if header.is_delta {
                    self.delta_dictionary_batches += 1;
                }
            }
            _ => {}
        }
    }
}

/// Encodes `message` with the framing and version from `options`.
pub(crate) fn encode_message(
    message: &Message,
    options: &WriteOptions,
    buf: &mut BytesMut,
) -> Result<FrameLengths, IpcError> {
    MessageEncoder::new(options.epoch(), options.metadata_version)
        .encode(message, buf)
        .map_err(IpcError::Encode)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Unopened,
    Writing,
    Closed,
}

/// Lifecycle and dictionary state of one writer.
#[derive(Debug)]
pub(crate) struct WriterCore {
    state: WriterState,
    options: WriteOptions,
    schema: Option<SchemaRef>,
    tracker: DictionaryTracker,
}

impl WriterCore {
    /// `allow_replacement` is false for files, whose dictionaries may only
    /// grow through deltas.
    pub(crate) fn new(options: WriteOptions, allow_replacement: bool) -> Result<Self, IpcError> {
        options.validate()?;
        Ok(Self {
            state: WriterState::Unopened,
            options,
            schema: None,
            tracker: DictionaryTracker::new(options.emit_dictionary_deltas, allow_replacement),
        })
    }

    pub(crate) fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub(crate) fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == WriterState::Closed
    }

    /// Fixes the schema and returns the Schema message to write.
    pub(crate) fn open(&mut self, schema: SchemaRef) -> Result<Message, IpcError> {
        match self.state {
            WriterState::Unopened => {}
            WriterState::Writing => return Err(UsageError::AlreadyOpen.into()),
            WriterState::Closed => return Err(UsageError::Closed.into()),
        }
        schema.validate()?;
        let message = Message::schema(self.options.metadata_version, &schema);
        self.schema = Some(schema);
        self.state = WriterState::Writing;
        Ok(message)
    }

    /// Messages to write for `batch`: dictionaries first, then the batch.
    pub(crate) fn plan_batch(&mut self, batch: &RecordBatch) -> Result<Vec<Message>, IpcError> {
        let schema = match (self.state, &self.schema) {
            (WriterState::Writing, Some(schema)) => schema,
            (WriterState::Closed, _) => return Err(UsageError::Closed.into()),
            _ => return Err(UsageError::NotOpen.into()),
        };
        if !schema.fields_match(batch.schema()) {
            return Err(UsageError::SchemaMismatch {
                expected: describe_fields(schema),
                actual: describe_fields(batch.schema()),
            }
            .into());
        }

        let version = self.options.metadata_version;
        let mut messages: Vec<Message> = self
            .tracker
            .collect(batch)?
            .iter()
            .map(|pending| pending.to_message(version))
            .collect();
        let encoded = encode_record_batch(batch);
        messages.push(Message::record_batch(version, encoded.header, encoded.body));
        Ok(messages)
    }

    /// Moves to Closed. Returns false when already closed.
    pub(crate) fn close(&mut self) -> Result<bool, IpcError> {
        match self.state {
            WriterState::Unopened => Err(UsageError::NotOpen.into()),
            WriterState::Closed => Ok(false),
            WriterState::Writing => {
                self.state = WriterState::Closed;
                Ok(true)
            }
        }
    }
}

fn describe_fields(schema: &SchemaRef) -> String {
    schema
        .fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Byte sink that frames messages and tracks its position.
#[derive(Debug)]
pub(crate) struct MessageSink<W> {
    sink: W,
    options: WriteOptions,
    position: u64,
    stats: WriteStats,
    scratch: BytesMut,
}

impl<W: Write> MessageSink<W> {
    pub(crate) fn new(sink: W, options: WriteOptions) -> Self {
        Self {
            sink,
            options,
            position: 0,
            stats: WriteStats::default(),
            scratch: BytesMut::with_capacity(8192),
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Writes bytes outside any envelope, such as file magic.
    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<(), IpcError> {
        self.sink.write_all(bytes)?;
        self.position += bytes.len() as u64;
        self.stats.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Writes one message and returns the block it occupies.
    pub(crate) fn write_message(&mut self, message: &Message) -> Result<Block, IpcError> {
        self.scratch.clear();
        let lengths = encode_message(message, &self.options, &mut self.scratch)?;
        self.sink.write_all(&self.scratch)?;

        let block = Block {
            offset: self.position,
            metadata_length: lengths.metadata_length as u32,
            body_length: lengths.body_length as u64,
        };
        self.position += lengths.total() as u64;
        self.stats.record_message(message, lengths);
        Ok(block)
    }

    pub(crate) fn write_end_of_stream(&mut self) -> Result<(), IpcError> {
        self.scratch.clear();
        MessageEncoder::new(self.options.epoch(), self.options.metadata_version)
            .encode_end_of_stream(&mut self.scratch);
        self.sink.write_all(&self.scratch)?;
        self.position += self.scratch.len() as u64;
        self.stats.bytes_written += self.scratch.len() as u64;
        debug!(
            "Wrote end-of-stream marker, {} messages / {} bytes total",
            self.stats.messages, self.stats.bytes_written
        );
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), IpcError> {
        self.sink.flush()?;
        Ok(())
    }

    pub(crate) fn get_ref(&self) -> &W {
        &self.sink
    }

    pub(crate) fn into_inner(self) -> W {
        self.sink
    }
}
