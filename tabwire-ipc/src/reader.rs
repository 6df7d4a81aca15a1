//! Blocking message reader and single-message helpers.
//!
//! [`MessageReader`] pulls one envelope at a time from any `Read` source.
//! Each envelope is read in three steps, each a bounded `read_exact`:
//!
//! ```text
//! prefix (4 or 8 bytes) -> metadata (declared length) -> body (body_length)
//! ```
//!
//! Running out of input between messages is taken as an implicit end of
//! stream. Running out inside a declared region is a truncation error.

use crate::error::{IpcError, Location};
use crate::writer::encode_message;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use tabwire_core::{RecordBatch, Schema, SchemaRef, Tensor};
use tabwire_protocol::{
    decode_prefix, decode_record_batch, encode_record_batch, DictionaryMemo, FrameLengths,
    FramingEpoch, Message, MessageHeader, MessageKind, MessageMetadata, Prefix, ProtocolError,
    WriteOptions,
};
use tracing::{trace, warn};

/// A message together with where it was found.
#[derive(Debug, Clone)]
pub struct ReadMessage {
    pub message: Message,
    /// Offset of the first prefix byte.
    pub offset: u64,
    pub epoch: FramingEpoch,
    pub lengths: FrameLengths,
}

/// Outcome of reading one envelope.
#[derive(Debug)]
pub(crate) enum RawRead {
    Message(ReadMessage),
    EndOfStream(FramingEpoch),
    /// Input ended cleanly on a message boundary.
    Eof,
}

/// Reads until `buf` is full or the source is exhausted, returning the
/// number of bytes read.
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads exactly `len` bytes of a declared region.
fn read_region<R: Read>(
    source: &mut R,
    len: u64,
    region: &'static str,
    location: Location,
) -> Result<BytesMut, IpcError> {
    let mut writer = BytesMut::new().writer();
    io::copy(&mut source.take(len), &mut writer)?;
    let buf = writer.into_inner();
    if (buf.len() as u64) < len {
        return Err(IpcError::decode(
            location,
            ProtocolError::Truncated {
                region,
                expected: len as usize,
                actual: buf.len(),
            },
        ));
    }
    Ok(buf)
}

/// Reads one envelope starting at `offset`. Decode errors are reported at
/// `location`.
pub(crate) fn read_raw<R: Read>(
    source: &mut R,
    offset: u64,
    location: Location,
) -> Result<RawRead, IpcError> {
    let mut prefix = [0u8; 8];
    let n = fill(source, &mut prefix[..4])?;
    if n == 0 {
        return Ok(RawRead::Eof);
    }
    let truncated_prefix = |expected: usize, actual: usize| {
        IpcError::decode(
            location,
            ProtocolError::Truncated {
                region: "prefix",
                expected,
                actual,
            },
        )
    };
    if n < 4 {
        return Err(truncated_prefix(4, n));
    }

    let decoded = match decode_prefix(&prefix[..4]).map_err(|e| IpcError::decode(location, e))? {
        Some(decoded) => decoded,
        None => {
            let n = fill(source, &mut prefix[4..])?;
            if n < 4 {
                return Err(truncated_prefix(8, 4 + n));
            }
            decode_prefix(&prefix)
                .map_err(|e| IpcError::decode(location, e))?
                .ok_or_else(|| truncated_prefix(8, 8))?
        }
    };

    let (epoch, length, prefix_len) = match decoded {
        (Prefix::EndOfStream(epoch), _) => return Ok(RawRead::EndOfStream(epoch)),
        (Prefix::Metadata { epoch, length }, consumed) => (epoch, length, consumed),
    };

    let raw = read_region(source, length as u64, "metadata", location)?;
    let metadata = MessageMetadata::parse(&raw).map_err(|e| IpcError::decode(location, e))?;
    let body_length = metadata.body_length;
    let body = read_region(source, body_length, "body", location)?;
    let message = metadata
        .into_message(body.freeze())
        .map_err(|e| IpcError::decode(location, e))?;

    trace!(
        "Read {} message at offset {} ({} framing)",
        message.kind(),
        offset,
        epoch
    );
    Ok(RawRead::Message(ReadMessage {
        message,
        offset,
        epoch,
        lengths: FrameLengths {
            metadata_length: prefix_len + length,
            body_length: body_length as usize,
        },
    }))
}

/// Sequential reader of framed messages.
#[derive(Debug)]
pub struct MessageReader<R> {
    source: R,
    position: u64,
    epoch: Option<FramingEpoch>,
    finished: bool,
}

impl<R: Read> MessageReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_position(source, 0)
    }

    /// Reader whose source is already positioned at `position`.
    pub fn with_position(source: R, position: u64) -> Self {
        Self {
            source,
            position,
            epoch: None,
            finished: false,
        }
    }

    /// Offset of the next message.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Framing epoch of the last envelope read.
    pub fn epoch(&self) -> Option<FramingEpoch> {
        self.epoch
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Reads the next message. Returns `Ok(None)` at the end-of-stream
    /// marker or when input ends on a message boundary.
    pub fn next_message(&mut self) -> Result<Option<ReadMessage>, IpcError> {
        if self.finished {
            return Ok(None);
        }
        let location = Location::Message {
            offset: self.position,
        };
        match read_raw(&mut self.source, self.position, location) {
            Ok(RawRead::Message(read)) => {
                self.position += read.lengths.total() as u64;
                self.epoch = Some(read.epoch);
                Ok(Some(read))
            }
            Ok(RawRead::EndOfStream(epoch)) => {
                self.position += epoch.prefix_len() as u64;
                self.epoch = Some(epoch);
                self.finished = true;
                Ok(None)
            }
            Ok(RawRead::Eof) => {
                warn!(
                    "Stream ended at offset {} without an end-of-stream marker",
                    self.position
                );
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }
}

impl<R: Read> Iterator for MessageReader<R> {
    type Item = Result<Message, IpcError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message()
            .map(|read| read.map(|r| r.message))
            .transpose()
    }
}

/// Reads a single message from `source`. `Ok(None)` at end of stream.
pub fn read_message<R: Read>(source: R) -> Result<Option<Message>, IpcError> {
    Ok(MessageReader::new(source).next_message()?.map(|r| r.message))
}

/// Reads a single Schema message.
pub fn read_schema<R: Read>(source: R) -> Result<Schema, IpcError> {
    let location = Location::Message { offset: 0 };
    let message = read_message(source)?
        .ok_or_else(|| IpcError::decode(location, ProtocolError::MissingSchema))?;
    match message.header {
        MessageHeader::Schema(schema) => Ok(schema),
        other => Err(IpcError::decode(
            location,
            ProtocolError::UnexpectedMessageKind {
                expected: MessageKind::Schema,
                actual: other.kind(),
            },
        )),
    }
}

/// Decodes a RecordBatch message against a known schema and dictionaries.
pub fn read_record_batch(
    message: &Message,
    schema: &SchemaRef,
    memo: &DictionaryMemo,
) -> Result<RecordBatch, IpcError> {
    let location = Location::Message { offset: 0 };
    match &message.header {
        MessageHeader::RecordBatch(header) => decode_record_batch(header, &message.body, schema, memo)
            .map_err(|e| IpcError::decode(location, e)),
        other => Err(IpcError::decode(
            location,
            ProtocolError::UnexpectedMessageKind {
                expected: MessageKind::RecordBatch,
                actual: other.kind(),
            },
        )),
    }
}

/// Writes one message to `sink`, returning the bytes written.
pub fn write_message<W: Write>(
    message: &Message,
    mut sink: W,
    options: &WriteOptions,
) -> Result<usize, IpcError> {
    let mut buf = BytesMut::new();
    encode_message(message, options, &mut buf)?;
    sink.write_all(&buf)?;
    Ok(buf.len())
}

/// Writes a tensor as a single Tensor message.
pub fn write_tensor<W: Write>(
    tensor: &Tensor,
    sink: W,
    options: &WriteOptions,
) -> Result<usize, IpcError> {
    write_message(
        &Message::tensor(options.metadata_version, tensor),
        sink,
        options,
    )
}

/// Reads a single Tensor message.
pub fn read_tensor<R: Read>(source: R) -> Result<Tensor, IpcError> {
    let location = Location::Message { offset: 0 };
    let message = read_message(source)?.ok_or_else(|| {
        IpcError::decode(
            location,
            ProtocolError::Truncated {
                region: "prefix",
                expected: 4,
                actual: 0,
            },
        )
    })?;
    message
        .to_tensor()
        .map_err(|e| IpcError::decode(location, e))
}

/// Encoded size of `batch` as one RecordBatch message.
pub fn get_record_batch_size(batch: &RecordBatch, options: &WriteOptions) -> Result<usize, IpcError> {
    let encoded = encode_record_batch(batch);
    let message = Message::record_batch(options.metadata_version, encoded.header, encoded.body);
    encoded_size(&message, options)
}

/// Encoded size of `tensor` as one Tensor message.
pub fn get_tensor_size(tensor: &Tensor, options: &WriteOptions) -> Result<usize, IpcError> {
    encoded_size(&Message::tensor(options.metadata_version, tensor), options)
}

fn encoded_size(message: &Message, options: &WriteOptions) -> Result<usize, IpcError> {
    let frame = message
        .to_frame(options.epoch())
        .map_err(IpcError::Encode)?;
    Ok(frame.lengths().total())
}

/// Zero-copy view used by the `from_bytes` constructors.
pub(crate) fn cursor(bytes: impl Into<Bytes>) -> io::Cursor<Bytes> {
    io::Cursor::new(bytes.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use tabwire_core::{ArrayData, DataType, Field};
    use tabwire_protocol::{MessageEncoder, MetadataVersion};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, true)]));
        RecordBatch::try_new(
            schema,
            vec![ArrayData::from_options(&[Some(1i32), None, Some(3)])],
        )
        .unwrap()
    }

    fn stream_bytes(epoch: FramingEpoch, end_marker: bool) -> BytesMut {
        let encoder = MessageEncoder::new(epoch, MetadataVersion::V5);
        let batch = batch();
        let mut buf = BytesMut::new();
        encoder.encode_schema(batch.schema(), &mut buf).unwrap();
        encoder.encode_record_batch(&batch, &mut buf).unwrap();
        if end_marker {
            encoder.encode_end_of_stream(&mut buf);
        }
        buf
    }

    #[test]
    fn test_reads_messages_in_order() {
        for epoch in [FramingEpoch::Legacy, FramingEpoch::Current] {
            let buf = stream_bytes(epoch, true);
            let mut reader = MessageReader::new(Cursor::new(&buf[..]));
            let first = reader.next_message().unwrap().unwrap();
            assert_eq!(first.offset, 0);
            assert_eq!(first.epoch, epoch);
            assert_eq!(first.message.kind(), MessageKind::Schema);

            let second = reader.next_message().unwrap().unwrap();
            assert_eq!(second.offset, first.lengths.total() as u64);
            assert_eq!(second.message.kind(), MessageKind::RecordBatch);

            assert!(reader.next_message().unwrap().is_none());
            assert_eq!(reader.position(), buf.len() as u64);
            assert_eq!(reader.epoch(), Some(epoch));
        }
    }

    #[test]
    fn test_missing_end_marker_is_end_of_stream() {
        let buf = stream_bytes(FramingEpoch::Current, false);
        let messages: Vec<_> = MessageReader::new(Cursor::new(&buf[..]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_truncated_body() {
        let buf = stream_bytes(FramingEpoch::Current, false);
        let cut = &buf[..buf.len() - 3];
        let mut reader = MessageReader::new(Cursor::new(cut));
        let first = reader.next_message().unwrap().unwrap();
        let err = reader.next_message().unwrap_err();
        assert_eq!(
            err.location(),
            Some(Location::Message {
                offset: first.lengths.total() as u64
            })
        );
        match err {
            IpcError::Decode {
                source: ProtocolError::Truncated { region, .. },
                ..
            } => assert_eq!(region, "body"),
            other => panic!("unexpected {:?}", other),
        }
        // Errors are terminal.
        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn test_read_region() {
        let location = Location::Message { offset: 0 };
        let mut source = Cursor::new(b"abcdefgh".to_vec());
        let region = read_region(&mut source, 5, "body", location).unwrap();
        assert_eq!(&region[..], b"abcde");

        // A declared length far past the input is a truncation, not an
        // allocation of that size.
        let err = read_region(&mut source, 1 << 52, "body", location).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::Truncated {
                    region: "body",
                    actual: 3,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_prefix() {
        let err = read_message(Cursor::new(&[0xFFu8, 0xFF, 0xFF, 0xFF, 0x10][..])).unwrap_err();
        match err {
            IpcError::Decode {
                source:
                    ProtocolError::Truncated {
                        region,
                        expected,
                        actual,
                    },
                ..
            } => {
                assert_eq!(region, "prefix");
                assert_eq!(expected, 8);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_schema_and_batch() {
        let buf = stream_bytes(FramingEpoch::Current, true);
        let schema = Arc::new(read_schema(Cursor::new(&buf[..])).unwrap());
        assert_eq!(schema.as_ref(), batch().schema().as_ref());

        let mut reader = MessageReader::new(Cursor::new(&buf[..]));
        reader.next_message().unwrap();
        let message = reader.next_message().unwrap().unwrap().message;
        let memo = DictionaryMemo::from_schema(&schema);
        let decoded = read_record_batch(&message, &schema, &memo).unwrap();
        assert_eq!(decoded.columns(), batch().columns());

        let err = read_record_batch(&Message::schema(MetadataVersion::V5, &schema), &schema, &memo)
            .unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_read_schema_rejects_other_kinds() {
        let buf = stream_bytes(FramingEpoch::Current, true);
        let mut reader = MessageReader::new(Cursor::new(&buf[..]));
        let first = reader.next_message().unwrap().unwrap();
        let rest = &buf[first.lengths.total()..];
        let err = read_schema(Cursor::new(rest)).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::UnexpectedMessageKind {
                    expected: MessageKind::Schema,
                    actual: MessageKind::RecordBatch,
                },
                ..
            }
        ));
    }

    #[test]
    fn test_tensor_roundtrip() {
        let tensor = Tensor::from_values(vec![2, 3], &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .with_dim_names(vec![Some("row".to_string()), None])
            .unwrap();
        for legacy in [false, true] {
            let options = WriteOptions::new().with_legacy_framing(legacy);
            let mut sink = Vec::new();
            let written = write_tensor(&tensor, &mut sink, &options).unwrap();
            assert_eq!(written, sink.len());
            assert_eq!(written, get_tensor_size(&tensor, &options).unwrap());

            let decoded = read_tensor(Cursor::new(&sink[..])).unwrap();
            assert_eq!(decoded, tensor);
            assert_eq!(decoded.value::<f64>(&[1, 2]), Some(6.0));
        }
    }

    #[test]
    fn test_record_batch_size_matches_writer() {
        let batch = batch();
        let options = WriteOptions::default();
        let encoder = MessageEncoder::new(options.epoch(), options.metadata_version);
        let mut buf = BytesMut::new();
        encoder.encode_record_batch(&batch, &mut buf).unwrap();
        assert_eq!(get_record_batch_size(&batch, &options).unwrap(), buf.len());
    }
}
