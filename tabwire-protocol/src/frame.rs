//! Message frame codec.
//!
//! Every message is an envelope of a length prefix, metadata and an
//! optional body. Two framing epochs exist:
//!
//! ```text
//! current:
//! +--------------+-------------+----------+---------+------------+
//! | 0xFFFFFFFF   | meta_len    | metadata | padding | body       |
//! | 4 bytes      | i32 LE      |          | to 8    | padded to 8|
//! +--------------+-------------+----------+---------+------------+
//!
//! legacy:
//! +-------------+----------+---------+------------+
//! | meta_len    | metadata | padding | body       |
//! | i32 LE      |          | to 8    | padded to 8|
//! +-------------+----------+---------+------------+
//! ```
//!
//! `meta_len` counts the metadata plus its padding, so that prefix,
//! metadata and padding together end on an 8-byte boundary. A `meta_len`
//! of zero is the end-of-stream marker.
//!
//! The epoch is detected from the first four bytes alone: the continuation
//! marker selects current framing and anything else is read as a legacy
//! length. A legacy length equal to the marker would be misread, but it
//! would also be a negative `i32` and is never produced by a writer. This
//! is an accepted constraint of the wire format, not something the decoder
//! tries to resolve.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Leading word of a current-epoch prefix.
pub const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// Alignment of metadata end and body buffers.
pub const ALIGNMENT: usize = 8;

/// Largest accepted metadata block (64 MiB).
pub const MAX_METADATA_SIZE: usize = 64 * 1024 * 1024;

/// Framing generation of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramingEpoch {
    /// Bare 4-byte length prefix.
    Legacy,
    /// Continuation marker followed by a 4-byte length.
    Current,
}

impl FramingEpoch {
    pub fn prefix_len(&self) -> usize {
        match self {
            FramingEpoch::Legacy => 4,
            FramingEpoch::Current => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FramingEpoch::Legacy => "legacy",
            FramingEpoch::Current => "current",
        }
    }
}

impl std::fmt::Display for FramingEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    EndOfStream(FramingEpoch),
    Metadata { epoch: FramingEpoch, length: usize },
}

impl Prefix {
    pub fn epoch(&self) -> FramingEpoch {
        match self {
            Prefix::EndOfStream(epoch) | Prefix::Metadata { epoch, .. } => *epoch,
        }
    }
}

/// Padding needed to bring `len` to the next multiple of [`ALIGNMENT`].
#[inline]
pub fn padding(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

#[inline]
pub fn padded_len(len: usize) -> usize {
    len + padding(len)
}

/// Decodes a length prefix from the start of `buf`.
///
/// Returns `Ok(Some((prefix, consumed)))` when a full prefix is present and
/// `Ok(None)` when more bytes are needed.
pub fn decode_prefix(buf: &[u8]) -> Result<Option<(Prefix, usize)>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let first = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let (epoch, length, consumed) = if first == CONTINUATION_MARKER {
        if buf.len() < 8 {
            return Ok(None);
        }
        let length = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        (FramingEpoch::Current, length, 8)
    } else {
        (FramingEpoch::Legacy, first as i32, 4)
    };

    if length < 0 {
        return Err(ProtocolError::NegativeLength(length));
    }
    if length == 0 {
        return Ok(Some((Prefix::EndOfStream(epoch), consumed)));
    }
    let length = length as usize;
    if length > MAX_METADATA_SIZE {
        return Err(ProtocolError::MetadataTooLarge {
            size: length,
            max: MAX_METADATA_SIZE,
        });
    }
    Ok(Some((Prefix::Metadata { epoch, length }, consumed)))
}

/// Bytes occupied by one encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLengths {
    /// Prefix, metadata and padding.
    pub metadata_length: usize,
    /// Body including padding.
    pub body_length: usize,
}

impl FrameLengths {
    pub fn total(&self) -> usize {
        self.metadata_length + self.body_length
    }
}

/// An envelope ready to be written.
#[derive(Debug, Clone)]
pub struct Frame {
    pub epoch: FramingEpoch,
    /// Serialized metadata, unpadded.
    pub metadata: Bytes,
    /// Message body, unpadded.
    pub body: Bytes,
}

impl Frame {
    pub fn new(epoch: FramingEpoch, metadata: Bytes, body: Bytes) -> Self {
        Self {
            epoch,
            metadata,
            body,
        }
    }

    /// Lengths this frame occupies once encoded.
    pub fn lengths(&self) -> FrameLengths {
        FrameLengths {
            metadata_length: padded_len(self.epoch.prefix_len() + self.metadata.len()),
            body_length: padded_len(self.body.len()),
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<FrameLengths, ProtocolError> {
        let lengths = self.lengths();
        let prefix_len = self.epoch.prefix_len();
        let declared = lengths.metadata_length - prefix_len;
        if declared > MAX_METADATA_SIZE {
            return Err(ProtocolError::MetadataTooLarge {
                size: declared,
                max: MAX_METADATA_SIZE,
            });
        }

        buf.reserve(lengths.total());
        if self.epoch == FramingEpoch::Current {
            buf.put_u32_le(CONTINUATION_MARKER);
        }
        buf.put_i32_le(declared as i32);
        buf.put_slice(&self.metadata);
        buf.put_bytes(0, declared - self.metadata.len());
        buf.put_slice(&self.body);
        buf.put_bytes(0, padding(self.body.len()));
        Ok(lengths)
    }

    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

/// Appends the end-of-stream marker for `epoch`, returning its length.
pub fn encode_end_of_stream(epoch: FramingEpoch, buf: &mut BytesMut) -> usize {
    if epoch == FramingEpoch::Current {
        buf.put_u32_le(CONTINUATION_MARKER);
    }
    buf.put_i32_le(0);
    epoch.prefix_len()
}
