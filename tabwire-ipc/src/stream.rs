//! Stream protocol.
//!
//! A stream is a Schema message, then any mix of DictionaryBatch and
//! RecordBatch messages, then the end-of-stream marker:
//!
//! ```text
//! Schema, (DictionaryBatch* RecordBatch)*, EOS
//! ```
//!
//! Every dictionary a batch refers to is written before that batch. Readers
//! accept input that simply ends on a message boundary in place of the
//! marker.

use crate::error::{IpcError, Location};
use crate::reader::{cursor, MessageReader};
use crate::writer::{MessageSink, WriteStats, WriterCore};
use bytes::Bytes;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tabwire_core::{FrameConversion, FromTableOptions, RecordBatch, SchemaRef, Table};
use tabwire_protocol::{
    decode_record_batch, DictionaryMemo, FramingEpoch, Message, MessageHeader, MessageKind,
    ProtocolError, WriteOptions,
};
use tracing::{debug, trace};

/// Writes record batches as a stream.
#[derive(Debug)]
pub struct StreamWriter<W: Write> {
    sink: MessageSink<W>,
    core: WriterCore,
}

impl<W: Write> StreamWriter<W> {
    /// Unopened writer. Call [`open`](Self::open) before writing batches.
    pub fn new(sink: W, options: WriteOptions) -> Result<Self, IpcError> {
        Ok(Self {
            sink: MessageSink::new(sink, options),
            core: WriterCore::new(options, true)?,
        })
    }

    /// Writer that has already written its Schema message.
    pub fn try_new(
        sink: W,
        schema: impl Into<SchemaRef>,
        options: WriteOptions,
    ) -> Result<Self, IpcError> {
        let mut writer = Self::new(sink, options)?;
        writer.open(schema)?;
        Ok(writer)
    }

    /// Writes the Schema message.
    pub fn open(&mut self, schema: impl Into<SchemaRef>) -> Result<(), IpcError> {
        let message = self.core.open(schema.into())?;
        self.sink.write_message(&message)?;
        debug!(
            "Opened stream writer ({} framing, {})",
            self.core.options().epoch(),
            self.core.options().metadata_version
        );
        Ok(())
    }

    /// Writes the dictionaries `batch` needs, then the batch itself.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), IpcError> {
        for message in self.core.plan_batch(batch)? {
            self.sink.write_message(&message)?;
        }
        trace!("Wrote record batch of {} rows", batch.num_rows());
        Ok(())
    }

    pub fn write_table(&mut self, table: &Table) -> Result<(), IpcError> {
        for batch in table.batches() {
            self.write_batch(batch)?;
        }
        Ok(())
    }

    /// Writes the end-of-stream marker and flushes. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<(), IpcError> {
        if self.core.close()? {
            self.sink.write_end_of_stream()?;
            self.sink.flush()?;
        }
        Ok(())
    }

    /// Closes the writer if still open and returns the sink.
    pub fn into_inner(mut self) -> Result<W, IpcError> {
        if self.core.schema().is_some() {
            self.close()?;
        }
        Ok(self.sink.into_inner())
    }

    pub fn get_ref(&self) -> &W {
        self.sink.get_ref()
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.core.schema()
    }

    pub fn options(&self) -> &WriteOptions {
        self.core.options()
    }

    pub fn stats(&self) -> WriteStats {
        self.sink.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

/// Decodes one post-schema message. Dictionary batches update `memo` and
/// yield nothing.
pub(crate) fn apply_message(
    message: &Message,
    schema: &SchemaRef,
    memo: &mut DictionaryMemo,
) -> Result<Option<RecordBatch>, ProtocolError> {
    match &message.header {
        MessageHeader::DictionaryBatch(header) => {
            memo.apply(header, &message.body)?;
            Ok(None)
        }
        MessageHeader::RecordBatch(header) => {
            decode_record_batch(header, &message.body, schema, memo).map(Some)
        }
        other => Err(ProtocolError::UnexpectedMessageKind {
            expected: MessageKind::RecordBatch,
            actual: other.kind(),
        }),
    }
}

/// Schema message that must open a stream.
pub(crate) fn expect_schema(message: Option<Message>) -> Result<SchemaRef, ProtocolError> {
    match message.map(|m| m.header) {
        None => Err(ProtocolError::MissingSchema),
        Some(MessageHeader::Schema(schema)) => Ok(Arc::new(schema)),
        Some(other) => Err(ProtocolError::UnexpectedMessageKind {
            expected: MessageKind::Schema,
            actual: other.kind(),
        }),
    }
}

/// Reads record batches from a stream.
#[derive(Debug)]
pub struct StreamReader<R> {
    messages: MessageReader<R>,
    schema: SchemaRef,
    memo: DictionaryMemo,
    epoch: FramingEpoch,
    done: bool,
}

impl<R: Read> StreamReader<R> {
    /// Reads the Schema message.
    pub fn try_new(source: R) -> Result<Self, IpcError> {
        let mut messages = MessageReader::new(source);
        let location = Location::Message { offset: 0 };
        let first = messages.next_message()?;
        let epoch = first
            .as_ref()
            .map(|r| r.epoch)
            .or(messages.epoch())
            .unwrap_or(FramingEpoch::Current);
        let schema =
            expect_schema(first.map(|r| r.message)).map_err(|e| IpcError::decode(location, e))?;
        debug!(
            "Opened stream with {} fields ({} framing)",
            schema.num_fields(),
            epoch
        );
        Ok(Self {
            memo: DictionaryMemo::from_schema(&schema),
            messages,
            schema,
            epoch,
            done: false,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Framing epoch the stream was written with.
    pub fn epoch(&self) -> FramingEpoch {
        self.epoch
    }

    /// Dictionaries received so far.
    pub fn dictionaries(&self) -> &DictionaryMemo {
        &self.memo
    }

    /// Next record batch, or `Ok(None)` once the stream has ended. The
    /// first error ends the stream.
    pub fn read_next_batch(&mut self) -> Result<Option<RecordBatch>, IpcError> {
        if self.done {
            return Ok(None);
        }
        let result = self.next_batch_inner();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn next_batch_inner(&mut self) -> Result<Option<RecordBatch>, IpcError> {
        while let Some(read) = self.messages.next_message()? {
            let location = Location::Message {
                offset: read.offset,
            };
            if let Some(batch) = apply_message(&read.message, &self.schema, &mut self.memo)
                .map_err(|e| IpcError::decode(location, e))?
            {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    /// Reads every remaining batch into a table.
    pub fn read_all(&mut self) -> Result<Table, IpcError> {
        let mut batches = Vec::new();
        while let Some(batch) = self.read_next_batch()? {
            batches.push(batch);
        }
        Ok(Table::try_new(self.schema.clone(), batches)?)
    }

    /// Reads every remaining batch and converts the result to a frame.
    pub fn read_frame<F: FrameConversion>(&mut self, options: &FromTableOptions) -> Result<F, IpcError> {
        let table = self.read_all()?;
        Ok(F::from_table(&table, options)?)
    }

    pub fn into_inner(self) -> R {
        self.messages.into_inner()
    }
}

impl StreamReader<Cursor<Bytes>> {
    /// Reader over an in-memory buffer. Each message is copied once out of
    /// `bytes`; decoded buffers share that copy.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, IpcError> {
        Self::try_new(cursor(bytes))
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = Result<RecordBatch, IpcError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_batch().transpose()
    }
}
