//! Stream protocol over tokio I/O.
//!
//! Same wire format and semantics as [`crate::stream`]. The reader feeds
//! an incremental [`MessageDecoder`] from `read_buf`, so a message may
//! arrive in any number of reads.

use crate::error::{IpcError, Location};
use crate::stream::{apply_message, expect_schema};
use crate::writer::{encode_message, WriteStats, WriterCore};
use bytes::BytesMut;
use tabwire_core::{RecordBatch, SchemaRef, Table};
use tabwire_protocol::{
    Decoded, DictionaryMemo, FramingEpoch, Message, MessageDecoder, MessageEncoder, WriteOptions,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Most bytes reserved ahead of one read.
const READ_CHUNK: usize = 64 * 1024;

/// Async counterpart of [`crate::StreamWriter`].
#[derive(Debug)]
pub struct AsyncStreamWriter<W> {
    sink: W,
    core: WriterCore,
    stats: WriteStats,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> AsyncStreamWriter<W> {
    pub fn new(sink: W, options: WriteOptions) -> Result<Self, IpcError> {
        Ok(Self {
            sink,
            core: WriterCore::new(options, true)?,
            stats: WriteStats::default(),
            buf: BytesMut::with_capacity(8192),
        })
    }

    pub async fn try_new(
        sink: W,
        schema: impl Into<SchemaRef>,
        options: WriteOptions,
    ) -> Result<Self, IpcError> {
        let mut writer = Self::new(sink, options)?;
        writer.open(schema).await?;
        Ok(writer)
    }

    pub async fn open(&mut self, schema: impl Into<SchemaRef>) -> Result<(), IpcError> {
        let message = self.core.open(schema.into())?;
        self.write_messages(&[message]).await
    }

    pub async fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), IpcError> {
        let messages = self.core.plan_batch(batch)?;
        self.write_messages(&messages).await
    }

    pub async fn write_table(&mut self, table: &Table) -> Result<(), IpcError> {
        for batch in table.batches() {
            self.write_batch(batch).await?;
        }
        Ok(())
    }

    async fn write_messages(&mut self, messages: &[Message]) -> Result<(), IpcError> {
        self.buf.clear();
        for message in messages {
            let lengths = encode_message(message, self.core.options(), &mut self.buf)?;
            self.stats.record_message(message, lengths);
        }
        self.sink.write_all(&self.buf).await?;
        Ok(())
    }

    /// Writes the end-of-stream marker and flushes. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) -> Result<(), IpcError> {
        if !self.core.close()? {
            return Ok(());
        }
        let options = *self.core.options();
        self.buf.clear();
        let written = MessageEncoder::new(options.epoch(), options.metadata_version)
            .encode_end_of_stream(&mut self.buf);
        self.sink.write_all(&self.buf).await?;
        self.sink.flush().await?;
        self.stats.bytes_written += written as u64;
        Ok(())
    }

    pub async fn into_inner(mut self) -> Result<W, IpcError> {
        if self.core.schema().is_some() {
            self.close().await?;
        }
        Ok(self.sink)
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.core.schema()
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }
}

/// Async counterpart of [`crate::StreamReader`].
#[derive(Debug)]
pub struct AsyncStreamReader<R> {
    source: R,
    decoder: MessageDecoder,
    position: u64,
    schema: SchemaRef,
    memo: DictionaryMemo,
    epoch: FramingEpoch,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncStreamReader<R> {
    pub async fn try_new(mut source: R) -> Result<Self, IpcError> {
        let mut decoder = MessageDecoder::new();
        let mut position = 0;
        let first = next_message(&mut source, &mut decoder, &mut position).await?;
        let epoch = first.as_ref().map(|(_, e)| *e).unwrap_or(FramingEpoch::Current);
        let schema = expect_schema(first.map(|(m, _)| m))
            .map_err(|e| IpcError::decode(Location::Message { offset: 0 }, e))?;
        debug!("Opened async stream with {} fields", schema.num_fields());
        Ok(Self {
            source,
            decoder,
            position,
            memo: DictionaryMemo::from_schema(&schema),
            schema,
            epoch,
            done: false,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn epoch(&self) -> FramingEpoch {
        self.epoch
    }

    pub async fn read_next_batch(&mut self) -> Result<Option<RecordBatch>, IpcError> {
        if self.done {
            return Ok(None);
        }
        let result = self.next_batch_inner().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    async fn next_batch_inner(&mut self) -> Result<Option<RecordBatch>, IpcError> {
        loop {
            let offset = self.position;
            let message =
                match next_message(&mut self.source, &mut self.decoder, &mut self.position).await? {
                    Some((message, _)) => message,
                    None => return Ok(None),
                };
            if let Some(batch) = apply_message(&message, &self.schema, &mut self.memo)
                .map_err(|e| IpcError::decode(Location::Message { offset }, e))?
            {
                return Ok(Some(batch));
            }
        }
    }

    pub async fn read_all(&mut self) -> Result<Table, IpcError> {
        let mut batches = Vec::new();
        while let Some(batch) = self.read_next_batch().await? {
            batches.push(batch);
        }
        Ok(Table::try_new(self.schema.clone(), batches)?)
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

/// Pulls the next message, reading from `source` as needed. `Ok(None)` at
/// the end-of-stream marker or a clean end of input.
async fn next_message<R: AsyncRead + Unpin>(
    source: &mut R,
    decoder: &mut MessageDecoder,
    position: &mut u64,
) -> Result<Option<(Message, FramingEpoch)>, IpcError> {
    loop {
        let location = Location::Message { offset: *position };
        match decoder
            .decode()
            .map_err(|e| IpcError::decode(location, e))?
        {
            Decoded::Message {
                message,
                epoch,
                lengths,
            } => {
                *position += lengths.total() as u64;
                return Ok(Some((message, epoch)));
            }
            Decoded::EndOfStream(epoch) => {
                *position += epoch.prefix_len() as u64;
                return Ok(None);
            }
            Decoded::NeedMore(needed) => {
                decoder.buffer_mut().reserve(needed.min(READ_CHUNK));
                if source.read_buf(decoder.buffer_mut()).await? == 0 {
                    if decoder.at_boundary() {
                        warn!(
                            "Stream ended at offset {} without an end-of-stream marker",
                            position
                        );
                        return Ok(None);
                    }
                    return Err(IpcError::decode(location, decoder.truncation_error()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabwire_core::{ArrayData, DataType, Field, Schema};
    use bytes::Bytes;
    use tabwire_protocol::{encode_record_batch, Frame, MetadataVersion, ProtocolError};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Float64, true)]));
        RecordBatch::try_new(
            schema,
            vec![ArrayData::from_options(&[Some(1.5f64), None, Some(-2.0)])],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let batch = batch();
        let mut writer = AsyncStreamWriter::try_new(Vec::new(), batch.schema().clone(), WriteOptions::default())
            .await
            .unwrap();
        writer.write_batch(&batch).await.unwrap();
        writer.write_batch(&batch).await.unwrap();
        assert_eq!(writer.stats().record_batches, 2);
        let buf = writer.into_inner().await.unwrap();

        // Byte-identical to the blocking writer.
        let mut sync = crate::StreamWriter::try_new(Vec::new(), batch.schema().clone(), WriteOptions::default())
            .unwrap();
        sync.write_batch(&batch).unwrap();
        sync.write_batch(&batch).unwrap();
        assert_eq!(buf, sync.into_inner().unwrap());

        let mut reader = AsyncStreamReader::try_new(&buf[..]).await.unwrap();
        let table = reader.read_all().await.unwrap();
        assert_eq!(table.num_batches(), 2);
        assert_eq!(table.batches()[0], batch);
    }

    #[tokio::test]
    async fn test_async_truncated() {
        let batch = batch();
        let mut writer = AsyncStreamWriter::try_new(Vec::new(), batch.schema().clone(), WriteOptions::default())
            .await
            .unwrap();
        writer.write_batch(&batch).await.unwrap();
        let buf = writer.into_inner().await.unwrap();
        let cut = &buf[..buf.len() - 12];

        let mut reader = AsyncStreamReader::try_new(cut).await.unwrap();
        let err = reader.read_next_batch().await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::Truncated { .. },
                ..
            }
        ));
        assert!(reader.read_next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_huge_declared_body() {
        let batch = batch();
        let encoded = encode_record_batch(&batch);
        let message = Message::record_batch(MetadataVersion::V5, encoded.header, encoded.body);
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&message.encode_metadata().unwrap()).unwrap();
        envelope["body_length"] = serde_json::json!(1u64 << 52);
        let metadata = Bytes::from(serde_json::to_vec(&envelope).unwrap());

        let mut buf = BytesMut::new();
        MessageEncoder::new(FramingEpoch::Current, MetadataVersion::V5)
            .encode_schema(batch.schema(), &mut buf)
            .unwrap();
        Frame::new(FramingEpoch::Current, metadata, Bytes::from(vec![0u8; 16]))
            .encode_into(&mut buf)
            .unwrap();

        let mut reader = AsyncStreamReader::try_new(&buf[..]).await.unwrap();
        let err = reader.read_next_batch().await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::Truncated { region: "body", .. },
                ..
            }
        ));
    }
}
