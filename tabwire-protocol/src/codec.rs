//! Message encoder and incremental decoder.
//!
//! The decoder is fed raw bytes and yields messages as soon as they are
//! complete. Both framing epochs go through the same state machine; only
//! the prefix step differs.

use crate::dictionary::PendingDictionary;
use crate::error::ProtocolError;
use crate::frame::{decode_prefix, encode_end_of_stream, FrameLengths, FramingEpoch, Prefix};
use crate::layout::encode_record_batch;
use crate::message::{Message, MessageMetadata, MetadataVersion};
use bytes::{Buf, BytesMut};
use tabwire_core::{RecordBatch, Schema};

/// Encodes messages with a fixed epoch and metadata version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEncoder {
    pub epoch: FramingEpoch,
    pub version: MetadataVersion,
}

impl MessageEncoder {
    pub fn new(epoch: FramingEpoch, version: MetadataVersion) -> Self {
        Self { epoch, version }
    }

    /// Encodes any message, overriding its metadata version.
    pub fn encode(
        &self,
        message: &Message,
        buf: &mut BytesMut,
    ) -> Result<FrameLengths, ProtocolError> {
        if message.version == self.version {
            message.to_frame(self.epoch)?.encode_into(buf)
        } else {
            let mut message = message.clone();
            message.version = self.version;
            message.to_frame(self.epoch)?.encode_into(buf)
        }
    }

    pub fn encode_schema(
        &self,
        schema: &Schema,
        buf: &mut BytesMut,
    ) -> Result<FrameLengths, ProtocolError> {
        self.encode(&Message::schema(self.version, schema), buf)
    }

    pub fn encode_record_batch(
        &self,
        batch: &RecordBatch,
        buf: &mut BytesMut,
    ) -> Result<FrameLengths, ProtocolError> {
        let encoded = encode_record_batch(batch);
        let message = Message::record_batch(self.version, encoded.header, encoded.body);
        self.encode(&message, buf)
    }

    pub fn encode_dictionary(
        &self,
        dictionary: &PendingDictionary,
        buf: &mut BytesMut,
    ) -> Result<FrameLengths, ProtocolError> {
        self.encode(&dictionary.to_message(self.version), buf)
    }

    pub fn encode_end_of_stream(&self, buf: &mut BytesMut) -> usize {
        encode_end_of_stream(self.epoch, buf)
    }
}

/// Result of one decode step.
#[derive(Debug)]
pub enum Decoded {
    Message {
        message: Message,
        epoch: FramingEpoch,
        lengths: FrameLengths,
    },
    EndOfStream(FramingEpoch),
    /// At least this many more bytes are needed.
    NeedMore(usize),
}

#[derive(Debug)]
enum State {
    Prefix,
    Metadata {
        epoch: FramingEpoch,
        prefix_len: usize,
        length: usize,
    },
    Body {
        epoch: FramingEpoch,
        metadata_length: usize,
        metadata: MessageMetadata,
        body_length: usize,
    },
}

/// Incremental message decoder over a growing byte buffer.
#[derive(Debug)]
pub struct MessageDecoder {
    buffer: BytesMut,
    state: State,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            state: State::Prefix,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Buffer to read into directly, e.g. with `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True between messages with nothing buffered.
    pub fn at_boundary(&self) -> bool {
        matches!(self.state, State::Prefix) && self.buffer.is_empty()
    }

    /// The error to report when input ends before the current message does.
    pub fn truncation_error(&self) -> ProtocolError {
        let (region, expected) = match &self.state {
            State::Prefix => ("prefix", if self.buffer.len() < 4 { 4 } else { 8 }),
            State::Metadata { length, .. } => ("metadata", *length),
            State::Body { body_length, .. } => ("body", *body_length),
        };
        ProtocolError::Truncated {
            region,
            expected,
            actual: self.buffer.len(),
        }
    }

    /// Attempts to decode the next message from the buffer.
    pub fn decode(&mut self) -> Result<Decoded, ProtocolError> {
        let result = self.step();
        if result.is_err() {
            self.state = State::Prefix;
        }
        result
    }

    fn step(&mut self) -> Result<Decoded, ProtocolError> {
        loop {
            match std::mem::replace(&mut self.state, State::Prefix) {
                State::Prefix => match decode_prefix(&self.buffer)? {
                    None => {
                        let needed = if self.buffer.len() < 4 { 4 } else { 8 };
                        return Ok(Decoded::NeedMore(needed - self.buffer.len()));
                    }
                    Some((Prefix::EndOfStream(epoch), consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok(Decoded::EndOfStream(epoch));
                    }
                    Some((Prefix::Metadata { epoch, length }, consumed)) => {
                        self.buffer.advance(consumed);
                        self.state = State::Metadata {
                            epoch,
                            prefix_len: consumed,
                            length,
                        };
                    }
                },
                State::Metadata {
                    epoch,
                    prefix_len,
                    length,
                } => {
                    if self.buffer.len() < length {
                        let needed = length - self.buffer.len();
                        self.state = State::Metadata {
                            epoch,
                            prefix_len,
                            length,
                        };
                        return Ok(Decoded::NeedMore(needed));
                    }
                    let raw = self.buffer.split_to(length);
                    let metadata = MessageMetadata::parse(&raw)?;
                    let body_length = usize::try_from(metadata.body_length).map_err(|_| {
                        ProtocolError::BodyTooLarge {
                            size: metadata.body_length as i64,
                        }
                    })?;
                    self.state = State::Body {
                        epoch,
                        metadata_length: prefix_len + length,
                        metadata,
                        body_length,
                    };
                }
                State::Body {
                    epoch,
                    metadata_length,
                    metadata,
                    body_length,
                } => {
                    if self.buffer.len() < body_length {
                        let needed = body_length - self.buffer.len();
                        self.state = State::Body {
                            epoch,
                            metadata_length,
                            metadata,
                            body_length,
                        };
                        return Ok(Decoded::NeedMore(needed));
                    }
                    let body = self.buffer.split_to(body_length).freeze();
                    let message = metadata.into_message(body)?;
                    return Ok(Decoded::Message {
                        message,
                        epoch,
                        lengths: FrameLengths {
                            metadata_length,
                            body_length,
                        },
                    });
                }
            }
        }
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}
