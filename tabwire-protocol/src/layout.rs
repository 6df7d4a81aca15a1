//! Record batch body layout.
//!
//! Arrays are flattened depth-first. Each array contributes one
//! [`FieldNode`] and its buffers, each starting on an 8-byte boundary:
//!
//! ```text
//! bool / primitive   validity, values
//! utf8 / binary      validity, offsets, data
//! list               validity, offsets, then the item array
//! struct             validity, then each child array
//! dictionary         validity, keys
//! ```
//!
//! An array without nulls still gets a validity entry, with length zero.
//! Dictionary values travel in their own DictionaryBatch messages.

use crate::dictionary::DictionaryMemo;
use crate::error::ProtocolError;
use crate::frame::padding;
use crate::message::{body_slice, BufferSpec, FieldNode, RecordBatchHeader};
use bytes::{BufMut, Bytes, BytesMut};
use tabwire_core::{ArrayData, DataType, Field, RecordBatch, SchemaRef};

/// Header and body of an encoded set of columns.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub header: RecordBatchHeader,
    pub body: Bytes,
}

struct BodyBuilder {
    nodes: Vec<FieldNode>,
    buffers: Vec<BufferSpec>,
    body: BytesMut,
}

impl BodyBuilder {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            buffers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    fn push_buffer(&mut self, bytes: &[u8]) {
        let offset = self.body.len() as u64;
        self.body.put_slice(bytes);
        self.body.put_bytes(0, padding(bytes.len()));
        self.buffers.push(BufferSpec {
            offset,
            length: bytes.len() as u64,
        });
    }

    fn visit(&mut self, array: &ArrayData) {
        self.nodes.push(FieldNode {
            length: array.len() as u64,
            null_count: array.null_count() as u64,
        });
        match array.validity() {
            Some(bits) => self.push_buffer(bits),
            None => self.push_buffer(&[]),
        }
        for buffer in array.buffers() {
            self.push_buffer(buffer);
        }
        for child in array.children() {
            self.visit(child);
        }
    }

    fn finish(self, length: usize) -> EncodedBody {
        EncodedBody {
            header: RecordBatchHeader {
                length: length as u64,
                nodes: self.nodes,
                buffers: self.buffers,
                compression: None,
            },
            body: self.body.freeze(),
        }
    }
}

/// Lays out `columns` of `length` rows into a single body.
pub fn encode_columns(columns: &[ArrayData], length: usize) -> EncodedBody {
    let mut builder = BodyBuilder::new();
    for column in columns {
        builder.visit(column);
    }
    builder.finish(length)
}

pub fn encode_record_batch(batch: &RecordBatch) -> EncodedBody {
    encode_columns(batch.columns(), batch.num_rows())
}

struct BodyReader<'a> {
    header: &'a RecordBatchHeader,
    body: &'a Bytes,
    memo: &'a DictionaryMemo,
    node: usize,
    buffer: usize,
}

impl<'a> BodyReader<'a> {
    fn next_node(&mut self) -> Result<FieldNode, ProtocolError> {
        let node = self.header.nodes.get(self.node).copied().ok_or_else(|| {
            ProtocolError::LayoutMismatch(format!(
                "metadata lists {} field nodes, schema needs more",
                self.header.nodes.len()
            ))
        })?;
        self.node += 1;
        Ok(node)
    }

    fn next_buffer(&mut self) -> Result<Bytes, ProtocolError> {
        let spec = self.header.buffers.get(self.buffer).ok_or_else(|| {
            ProtocolError::LayoutMismatch(format!(
                "metadata lists {} buffers, schema needs more",
                self.header.buffers.len()
            ))
        })?;
        self.buffer += 1;
        body_slice(self.body, spec)
    }

    fn read_array(&mut self, data_type: &DataType) -> Result<ArrayData, ProtocolError> {
        let node = self.next_node()?;
        let len = usize::try_from(node.length)
            .map_err(|_| ProtocolError::LayoutMismatch(format!("node length {}", node.length)))?;
        let validity_buffer = self.next_buffer()?;
        let validity = if node.null_count == 0 {
            None
        } else {
            Some(validity_buffer)
        };

        let array = match data_type {
            DataType::Struct(fields) => {
                let children = fields
                    .iter()
                    .map(|f| self.read_array(&f.data_type))
                    .collect::<Result<Vec<_>, _>>()?;
                ArrayData::try_new(data_type.clone(), len, validity, vec![], children, None)?
            }
            DataType::List(item) => {
                let offsets = self.next_buffer()?;
                let child = self.read_array(&item.data_type)?;
                ArrayData::try_new(
                    data_type.clone(),
                    len,
                    validity,
                    vec![offsets],
                    vec![child],
                    None,
                )?
            }
            DataType::Utf8 | DataType::Binary => {
                let offsets = self.next_buffer()?;
                let data = self.next_buffer()?;
                ArrayData::try_new(
                    data_type.clone(),
                    len,
                    validity,
                    vec![offsets, data],
                    vec![],
                    None,
                )?
            }
            DataType::Dictionary { id, .. } => {
                let keys = self.next_buffer()?;
                let dictionary = self
                    .memo
                    .get(*id)
                    .ok_or(ProtocolError::UndefinedDictionary(*id))?;
                ArrayData::try_new(
                    data_type.clone(),
                    len,
                    validity,
                    vec![keys],
                    vec![],
                    Some(dictionary),
                )?
            }
            _ => {
                let values = self.next_buffer()?;
                ArrayData::try_new(data_type.clone(), len, validity, vec![values], vec![], None)?
            }
        };

        if array.null_count() as u64 != node.null_count {
            return Err(ProtocolError::LayoutMismatch(format!(
                "node declares {} nulls, validity has {}",
                node.null_count,
                array.null_count()
            )));
        }
        Ok(array)
    }
}

/// Rebuilds columns for `fields` from a body. Buffers are zero-copy
/// slices of `body`.
pub fn decode_columns(
    header: &RecordBatchHeader,
    body: &Bytes,
    fields: &[Field],
    memo: &DictionaryMemo,
) -> Result<Vec<ArrayData>, ProtocolError> {
    let mut reader = BodyReader {
        header,
        body,
        memo,
        node: 0,
        buffer: 0,
    };
    let columns = fields
        .iter()
        .map(|f| reader.read_array(&f.data_type))
        .collect::<Result<Vec<_>, _>>()?;
    if reader.node != header.nodes.len() || reader.buffer != header.buffers.len() {
        return Err(ProtocolError::LayoutMismatch(format!(
            "schema consumed {} of {} nodes and {} of {} buffers",
            reader.node,
            header.nodes.len(),
            reader.buffer,
            header.buffers.len()
        )));
    }
    Ok(columns)
}

/// Decodes a record batch body against `schema`.
pub fn decode_record_batch(
    header: &RecordBatchHeader,
    body: &Bytes,
    schema: &SchemaRef,
    memo: &DictionaryMemo,
) -> Result<RecordBatch, ProtocolError> {
    let columns = decode_columns(header, body, &schema.fields, memo)?;
    let length = usize::try_from(header.length)
        .map_err(|_| ProtocolError::LayoutMismatch(format!("batch length {}", header.length)))?;
    Ok(RecordBatch::try_new_with_row_count(
        schema.clone(),
        columns,
        length,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabwire_core::{DataError, IndexType, Schema};

    fn nested_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("scores", DataType::list(DataType::Float64), true),
            Field::new(
                "point",
                DataType::Struct(vec![
                    Field::new("x", DataType::Int32, false),
                    Field::new("ok", DataType::Boolean, true),
                ]),
                true,
            ),
        ]))
    }

    fn nested_batch() -> RecordBatch {
        let scores = ArrayData::new_list(
            Field::new("item", DataType::Float64, true),
            &[0, 2, 2, 3],
            Some(&[true, false, true]),
            ArrayData::from_options(&[Some(1.0f64), None, Some(3.5)]),
        )
        .unwrap();
        let point = ArrayData::new_struct(
            vec![
                Field::new("x", DataType::Int32, false),
                Field::new("ok", DataType::Boolean, true),
            ],
            vec![
                ArrayData::from_values(&[1i32, 2, 3]),
                ArrayData::from_bools(&[Some(true), None, Some(false)]),
            ],
            None,
        )
        .unwrap();
        RecordBatch::try_new(
            nested_schema(),
            vec![
                ArrayData::from_values(&[10i64, 20, 30]),
                ArrayData::from_strs(&[Some("a"), None, Some("ccc")]),
                scores,
                point,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_nested_roundtrip() {
        let batch = nested_batch();
        let encoded = encode_record_batch(&batch);
        assert_eq!(encoded.body.len() % 8, 0);
        for spec in &encoded.header.buffers {
            assert_eq!(spec.offset % 8, 0);
        }

        let memo = DictionaryMemo::from_schema(batch.schema());
        let decoded =
            decode_record_batch(&encoded.header, &encoded.body, batch.schema(), &memo).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_node_order_is_depth_first() {
        let encoded = encode_record_batch(&nested_batch());
        // id, name, scores, scores.item, point, point.x, point.ok
        assert_eq!(encoded.header.nodes.len(), 7);
        assert_eq!(encoded.header.nodes[3].length, 3);
        assert_eq!(encoded.header.nodes[3].null_count, 1);
        // 2 + 3 + 2 + 2 + 1 + 2 + 2
        assert_eq!(encoded.header.buffers.len(), 14);
    }

    #[test]
    fn test_missing_buffers_rejected() {
        let batch = nested_batch();
        let mut encoded = encode_record_batch(&batch);
        encoded.header.buffers.pop();
        let memo = DictionaryMemo::from_schema(batch.schema());
        let result = decode_record_batch(&encoded.header, &encoded.body, batch.schema(), &memo);
        assert!(matches!(result, Err(ProtocolError::LayoutMismatch(_))));
    }

    #[test]
    fn test_extra_nodes_rejected() {
        let batch = nested_batch();
        let mut encoded = encode_record_batch(&batch);
        encoded.header.nodes.push(FieldNode {
            length: 0,
            null_count: 0,
        });
        let memo = DictionaryMemo::from_schema(batch.schema());
        let result = decode_record_batch(&encoded.header, &encoded.body, batch.schema(), &memo);
        assert!(matches!(result, Err(ProtocolError::LayoutMismatch(_))));
    }

    #[test]
    fn test_huge_node_length_rejected() {
        let batch = nested_batch();
        let mut encoded = encode_record_batch(&batch);
        encoded.header.length = 1 << 61;
        encoded.header.nodes[0].length = 1 << 61;
        let memo = DictionaryMemo::from_schema(batch.schema());
        let result = decode_record_batch(&encoded.header, &encoded.body, batch.schema(), &memo);
        assert!(matches!(
            result,
            Err(ProtocolError::Data(DataError::InvalidArray { .. }))
        ));
    }

    #[test]
    fn test_buffer_past_body_rejected() {
        let batch = nested_batch();
        let mut encoded = encode_record_batch(&batch);
        encoded.header.buffers[1].offset = encoded.body.len() as u64;
        let memo = DictionaryMemo::from_schema(batch.schema());
        let result = decode_record_batch(&encoded.header, &encoded.body, batch.schema(), &memo);
        assert!(matches!(
            result,
            Err(ProtocolError::BufferOutOfRange { .. })
        ));
    }

    #[test]
    fn test_undefined_dictionary() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "tag",
            DataType::dictionary(7, IndexType::Int32, DataType::Utf8),
            true,
        )]));
        let dict = Arc::new(ArrayData::from_strs(&[Some("x")]));
        let column = ArrayData::new_dictionary(7, IndexType::Int32, &[Some(0)], dict).unwrap();
        let batch = RecordBatch::try_new(schema.clone(), vec![column]).unwrap();
        let encoded = encode_record_batch(&batch);
        let memo = DictionaryMemo::from_schema(&schema);
        let result = decode_record_batch(&encoded.header, &encoded.body, &schema, &memo);
        assert!(matches!(result, Err(ProtocolError::UndefinedDictionary(7))));
    }
}
