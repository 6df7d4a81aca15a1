//! Message metadata and the message type registry.
//!
//! Metadata is a JSON object:
//!
//! ```text
//! {
//!   "version": 4,            metadata version ordinal (V1=0 .. V5=4)
//!   "kind": 2,               registry tag
//!   "body_length": 64,       body bytes following the metadata, padded
//!   "header": { ... },       kind-specific header
//!   "custom_metadata": {}    optional key/value pairs
//! }
//! ```
//!
//! Registry tags: Schema(0), DictionaryBatch(1), RecordBatch(2), Tensor(3),
//! SparseTensor(4, reserved).

use crate::error::ProtocolError;
use crate::frame::{padded_len, Frame, FramingEpoch};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tabwire_core::{DataType, Schema, Tensor};

/// Metadata format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataVersion {
    V1,
    V2,
    V3,
    V4,
    V5,
}

impl MetadataVersion {
    pub fn ordinal(&self) -> i16 {
        match self {
            MetadataVersion::V1 => 0,
            MetadataVersion::V2 => 1,
            MetadataVersion::V3 => 2,
            MetadataVersion::V4 => 3,
            MetadataVersion::V5 => 4,
        }
    }

    pub fn from_ordinal(ordinal: i16) -> Option<Self> {
        match ordinal {
            0 => Some(MetadataVersion::V1),
            1 => Some(MetadataVersion::V2),
            2 => Some(MetadataVersion::V3),
            3 => Some(MetadataVersion::V4),
            4 => Some(MetadataVersion::V5),
            _ => None,
        }
    }

    /// Versions this implementation reads and writes.
    pub fn is_supported(&self) -> bool {
        matches!(self, MetadataVersion::V4 | MetadataVersion::V5)
    }
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.ordinal() + 1)
    }
}

/// Registry tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Schema = 0,
    DictionaryBatch = 1,
    RecordBatch = 2,
    Tensor = 3,
    SparseTensor = 4,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Schema),
            1 => Ok(MessageKind::DictionaryBatch),
            2 => Ok(MessageKind::RecordBatch),
            3 => Ok(MessageKind::Tensor),
            4 => Ok(MessageKind::SparseTensor),
            _ => Err(ProtocolError::UnknownMessageKind(value)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Schema => "Schema",
            MessageKind::DictionaryBatch => "DictionaryBatch",
            MessageKind::RecordBatch => "RecordBatch",
            MessageKind::Tensor => "Tensor",
            MessageKind::SparseTensor => "SparseTensor",
        };
        f.write_str(name)
    }
}

/// Row count and null count of one array node, depth-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNode {
    pub length: u64,
    pub null_count: u64,
}

/// Location of one buffer inside a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferSpec {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBatchHeader {
    pub length: u64,
    pub nodes: Vec<FieldNode>,
    pub buffers: Vec<BufferSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryBatchHeader {
    pub id: i64,
    /// Layout of the single dictionary values column.
    pub data: RecordBatchHeader,
    #[serde(default)]
    pub is_delta: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDim {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorHeader {
    pub value_type: DataType,
    pub shape: Vec<TensorDim>,
    pub strides: Vec<u64>,
    pub data: BufferSpec,
}

#[derive(Serialize, Deserialize)]
struct SchemaHeader {
    schema: Schema,
}

/// Kind-specific message header.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageHeader {
    Schema(Schema),
    DictionaryBatch(DictionaryBatchHeader),
    RecordBatch(RecordBatchHeader),
    Tensor(TensorHeader),
}

impl MessageHeader {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageHeader::Schema(_) => MessageKind::Schema,
            MessageHeader::DictionaryBatch(_) => MessageKind::DictionaryBatch,
            MessageHeader::RecordBatch(_) => MessageKind::RecordBatch,
            MessageHeader::Tensor(_) => MessageKind::Tensor,
        }
    }

    fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            MessageHeader::Schema(schema) => serde_json::to_value(SchemaHeader {
                schema: schema.clone(),
            })?,
            MessageHeader::DictionaryBatch(header) => serde_json::to_value(header)?,
            MessageHeader::RecordBatch(header) => serde_json::to_value(header)?,
            MessageHeader::Tensor(header) => serde_json::to_value(header)?,
        };
        Ok(value)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: i16,
    kind: u8,
    body_length: u64,
    #[serde(default)]
    header: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    custom_metadata: BTreeMap<String, String>,
}

/// Metadata decoded far enough to know the body length and kind.
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    pub version: MetadataVersion,
    pub kind: MessageKind,
    pub body_length: u64,
    header: Value,
    pub custom_metadata: BTreeMap<String, String>,
}

impl MessageMetadata {
    /// Parses metadata bytes, ignoring trailing zero padding.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let end = bytes
            .iter()
            .rposition(|b| *b != 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        if end == 0 {
            return Err(ProtocolError::InvalidMetadata(
                "metadata block is empty".to_string(),
            ));
        }
        let envelope: Envelope = serde_json::from_slice(&bytes[..end])?;

        let version = MetadataVersion::from_ordinal(envelope.version)
            .filter(|v| v.is_supported())
            .ok_or(ProtocolError::UnsupportedVersion(envelope.version))?;
        let kind = MessageKind::try_from(envelope.kind)?;
        if envelope.body_length > i64::MAX as u64 {
            return Err(ProtocolError::BodyTooLarge {
                size: i64::MAX,
            });
        }
        Ok(Self {
            version,
            kind,
            body_length: envelope.body_length,
            header: envelope.header,
            custom_metadata: envelope.custom_metadata,
        })
    }

    /// Decodes the kind-specific header and attaches the body.
    pub fn into_message(self, body: Bytes) -> Result<Message, ProtocolError> {
        if body.len() as u64 != self.body_length {
            return Err(ProtocolError::BodyLengthMismatch {
                declared: self.body_length,
                actual: body.len() as u64,
            });
        }
        let header = match self.kind {
            MessageKind::Schema => {
                let header: SchemaHeader = serde_json::from_value(self.header)?;
                header.schema.validate()?;
                MessageHeader::Schema(header.schema)
            }
            MessageKind::DictionaryBatch => {
                let header: DictionaryBatchHeader = serde_json::from_value(self.header)?;
                reject_compression(&header.data)?;
                MessageHeader::DictionaryBatch(header)
            }
            MessageKind::RecordBatch => {
                let header: RecordBatchHeader = serde_json::from_value(self.header)?;
                reject_compression(&header)?;
                MessageHeader::RecordBatch(header)
            }
            MessageKind::Tensor => MessageHeader::Tensor(serde_json::from_value(self.header)?),
            MessageKind::SparseTensor => {
                return Err(ProtocolError::UnsupportedMessageKind(MessageKind::SparseTensor))
            }
        };
        Ok(Message {
            version: self.version,
            header,
            body,
            custom_metadata: self.custom_metadata,
        })
    }
}

fn reject_compression(header: &RecordBatchHeader) -> Result<(), ProtocolError> {
    match &header.compression {
        Some(codec) => Err(ProtocolError::UnsupportedCompression(codec.clone())),
        None => Ok(()),
    }
}

/// A complete message: metadata header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: MetadataVersion,
    pub header: MessageHeader,
    pub body: Bytes,
    pub custom_metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(version: MetadataVersion, header: MessageHeader, body: Bytes) -> Self {
        Self {
            version,
            header,
            body,
            custom_metadata: BTreeMap::new(),
        }
    }

    pub fn schema(version: MetadataVersion, schema: &Schema) -> Self {
        Self::new(version, MessageHeader::Schema(schema.clone()), Bytes::new())
    }

    pub fn record_batch(version: MetadataVersion, header: RecordBatchHeader, body: Bytes) -> Self {
        Self::new(version, MessageHeader::RecordBatch(header), body)
    }

    pub fn dictionary_batch(
        version: MetadataVersion,
        header: DictionaryBatchHeader,
        body: Bytes,
    ) -> Self {
        Self::new(version, MessageHeader::DictionaryBatch(header), body)
    }

    /// Tensor message whose body is the tensor data.
    pub fn tensor(version: MetadataVersion, tensor: &Tensor) -> Self {
        let header = TensorHeader {
            value_type: tensor.value_type.clone(),
            shape: tensor
                .shape
                .iter()
                .zip(&tensor.dim_names)
                .map(|(size, name)| TensorDim {
                    size: *size as u64,
                    name: name.clone(),
                })
                .collect(),
            strides: tensor.strides.iter().map(|s| *s as u64).collect(),
            data: BufferSpec {
                offset: 0,
                length: tensor.data.len() as u64,
            },
        };
        Self::new(version, MessageHeader::Tensor(header), tensor.data.clone())
    }

    pub fn with_custom_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.custom_metadata = metadata;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind()
    }

    /// Serializes the metadata block. The declared body length includes
    /// body padding.
    pub fn encode_metadata(&self) -> Result<Bytes, ProtocolError> {
        let envelope = Envelope {
            version: self.version.ordinal(),
            kind: self.kind() as u8,
            body_length: padded_len(self.body.len()) as u64,
            header: self.header.to_value()?,
            custom_metadata: self.custom_metadata.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    pub fn to_frame(&self, epoch: FramingEpoch) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(epoch, self.encode_metadata()?, self.body.clone()))
    }

    /// Fails unless the message is of kind `expected`.
    pub fn expect_kind(&self, expected: MessageKind) -> Result<(), ProtocolError> {
        let actual = self.kind();
        if actual != expected {
            return Err(ProtocolError::UnexpectedMessageKind { expected, actual });
        }
        Ok(())
    }

    /// Reconstructs the tensor carried by a Tensor message.
    pub fn to_tensor(&self) -> Result<Tensor, ProtocolError> {
        let header = match &self.header {
            MessageHeader::Tensor(header) => header,
            other => {
                return Err(ProtocolError::UnexpectedMessageKind {
                    expected: MessageKind::Tensor,
                    actual: other.kind(),
                })
            }
        };
        let data = body_slice(&self.body, &header.data)?;
        let tensor = Tensor::try_new(
            header.value_type.clone(),
            header.shape.iter().map(|d| d.size as usize).collect(),
            Some(header.strides.iter().map(|s| *s as usize).collect()),
            Some(header.shape.iter().map(|d| d.name.clone()).collect()),
            data,
        )?;
        Ok(tensor)
    }
}

/// Zero-copy slice of `body` described by `spec`.
pub fn body_slice(body: &Bytes, spec: &BufferSpec) -> Result<Bytes, ProtocolError> {
    let end = spec.offset.checked_add(spec.length);
    match end {
        Some(end) if end <= body.len() as u64 => {
            Ok(body.slice(spec.offset as usize..end as usize))
        }
        _ => Err(ProtocolError::BufferOutOfRange {
            offset: spec.offset,
            length: spec.length,
            body_length: body.len() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabwire_core::Field;

    fn decode(message: &Message) -> Message {
        let metadata = message.encode_metadata().unwrap();
        let mut padded = metadata.to_vec();
        padded.extend_from_slice(&[0, 0, 0]);
        let parsed = MessageMetadata::parse(&padded).unwrap();
        let mut body = message.body.to_vec();
        body.resize(padded_len(body.len()), 0);
        parsed.into_message(Bytes::from(body)).unwrap()
    }

    #[test]
    fn test_message_kind_try_from() {
        assert_eq!(MessageKind::try_from(0).unwrap(), MessageKind::Schema);
        assert_eq!(MessageKind::try_from(2).unwrap(), MessageKind::RecordBatch);
        assert_eq!(MessageKind::try_from(4).unwrap(), MessageKind::SparseTensor);
        assert!(matches!(
            MessageKind::try_from(5),
            Err(ProtocolError::UnknownMessageKind(5))
        ));
    }

    #[test]
    fn test_version_ordinals() {
        assert_eq!(MetadataVersion::V4.ordinal(), 3);
        assert_eq!(MetadataVersion::V5.ordinal(), 4);
        assert_eq!(MetadataVersion::from_ordinal(4), Some(MetadataVersion::V5));
        assert_eq!(MetadataVersion::from_ordinal(7), None);
        assert!(!MetadataVersion::V3.is_supported());
        assert_eq!(MetadataVersion::V4.to_string(), "V4");
    }

    #[test]
    fn test_schema_message_roundtrip() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let message = Message::schema(MetadataVersion::V5, &schema);
        let decoded = decode(&message);
        assert_eq!(decoded.kind(), MessageKind::Schema);
        assert_eq!(decoded.header, MessageHeader::Schema(schema));
        assert_eq!(decoded.version, MetadataVersion::V5);
    }

    #[test]
    fn test_old_version_rejected() {
        let raw = br#"{"version":2,"kind":0,"body_length":0,"header":{}}"#;
        assert!(matches!(
            MessageMetadata::parse(raw),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let raw = br#"{"version":4,"kind":42,"body_length":0,"header":{}}"#;
        assert!(matches!(
            MessageMetadata::parse(raw),
            Err(ProtocolError::UnknownMessageKind(42))
        ));
    }

    #[test]
    fn test_sparse_tensor_unsupported() {
        let raw = br#"{"version":4,"kind":4,"body_length":0,"header":{}}"#;
        let metadata = MessageMetadata::parse(raw).unwrap();
        assert!(matches!(
            metadata.into_message(Bytes::new()),
            Err(ProtocolError::UnsupportedMessageKind(MessageKind::SparseTensor))
        ));
    }

    #[test]
    fn test_compression_rejected() {
        let raw = br#"{"version":4,"kind":2,"body_length":0,
            "header":{"length":0,"nodes":[],"buffers":[],"compression":"lz4"}}"#;
        let metadata = MessageMetadata::parse(raw).unwrap();
        assert!(matches!(
            metadata.into_message(Bytes::new()),
            Err(ProtocolError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_body_length_mismatch() {
        let raw = br#"{"version":4,"kind":2,"body_length":16,
            "header":{"length":0,"nodes":[],"buffers":[]}}"#;
        let metadata = MessageMetadata::parse(raw).unwrap();
        assert!(matches!(
            metadata.into_message(Bytes::from_static(&[0; 8])),
            Err(ProtocolError::BodyLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_metadata_rejected() {
        assert!(matches!(
            MessageMetadata::parse(&[0; 8]),
            Err(ProtocolError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_tensor_message() {
        let tensor = Tensor::from_values(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap()
            .with_dim_names(vec![Some("row".to_string()), None])
            .unwrap();
        let message = Message::tensor(MetadataVersion::V4, &tensor);
        let decoded = decode(&message);
        assert_eq!(decoded.to_tensor().unwrap(), tensor);
    }

    #[test]
    fn test_expect_kind() {
        let message = Message::schema(MetadataVersion::V5, &Schema::empty());
        assert!(message.expect_kind(MessageKind::Schema).is_ok());
        assert!(matches!(
            message.expect_kind(MessageKind::RecordBatch),
            Err(ProtocolError::UnexpectedMessageKind { .. })
        ));
        assert!(message.to_tensor().is_err());
    }

    #[test]
    fn test_body_slice_out_of_range() {
        let body = Bytes::from_static(&[0; 8]);
        let spec = BufferSpec {
            offset: 4,
            length: 8,
        };
        assert!(matches!(
            body_slice(&body, &spec),
            Err(ProtocolError::BufferOutOfRange { .. })
        ));
    }
}
