//! Dictionary bookkeeping for readers and writers.
//!
//! Readers accumulate dictionaries in a [`DictionaryMemo`] as DictionaryBatch
//! messages arrive. Writers use a [`DictionaryTracker`] to decide which
//! dictionaries a batch needs sent before it, and whether each goes out as
//! a new dictionary, a delta or a replacement.

use crate::error::{ProtocolError, UsageError};
use crate::layout::{decode_columns, encode_columns};
use crate::message::{DictionaryBatchHeader, Message, MetadataVersion};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tabwire_core::{concat, ArrayData, DataType, Field, RecordBatch, Schema};
use tracing::trace;

/// How a dictionary batch changed the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryUpdate {
    New,
    Replaced,
    Delta,
}

/// Reader-side dictionary state for one stream or file.
#[derive(Debug, Clone, Default)]
pub struct DictionaryMemo {
    value_types: HashMap<i64, DataType>,
    dictionaries: HashMap<i64, Arc<ArrayData>>,
}

impl DictionaryMemo {
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            value_types: schema.dictionary_value_types(),
            dictionaries: HashMap::new(),
        }
    }

    pub fn get(&self, id: i64) -> Option<Arc<ArrayData>> {
        self.dictionaries.get(&id).cloned()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.dictionaries.contains_key(&id)
    }

    /// Number of dictionary ids with values.
    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }

    /// Decodes a dictionary batch and folds it into the memo.
    ///
    /// A delta appends to the current dictionary. Anything else replaces it.
    /// Arrays decoded earlier keep the dictionary they were built with.
    pub fn apply(
        &mut self,
        header: &DictionaryBatchHeader,
        body: &Bytes,
    ) -> Result<DictionaryUpdate, ProtocolError> {
        let value_type = self
            .value_types
            .get(&header.id)
            .cloned()
            .ok_or(ProtocolError::UnknownDictionaryId(header.id))?;
        let fields = [Field::new("values", value_type, true)];
        let values = decode_columns(&header.data, body, &fields, self)?
            .pop()
            .ok_or_else(|| ProtocolError::LayoutMismatch("empty dictionary batch".to_string()))?;

        let update = if header.is_delta {
            let base = self
                .dictionaries
                .get(&header.id)
                .ok_or(ProtocolError::DeltaWithoutBase(header.id))?;
            let merged = concat(&[base.as_ref(), &values])?;
            self.dictionaries.insert(header.id, Arc::new(merged));
            DictionaryUpdate::Delta
        } else {
            let previous = self.dictionaries.insert(header.id, Arc::new(values));
            if previous.is_some() {
                DictionaryUpdate::Replaced
            } else {
                DictionaryUpdate::New
            }
        };
        trace!(
            "Applied dictionary {} ({:?}), {} values",
            header.id,
            update,
            self.dictionaries.get(&header.id).map(|d| d.len()).unwrap_or(0)
        );
        Ok(update)
    }
}

/// A dictionary batch a writer must emit before the next record batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDictionary {
    pub id: i64,
    pub values: Arc<ArrayData>,
    pub is_delta: bool,
}

impl PendingDictionary {
    pub fn to_message(&self, version: MetadataVersion) -> Message {
        let encoded = encode_columns(std::slice::from_ref(self.values.as_ref()), self.values.len());
        Message::dictionary_batch(
            version,
            DictionaryBatchHeader {
                id: self.id,
                data: encoded.header,
                is_delta: self.is_delta,
            },
            encoded.body,
        )
    }
}

/// Writer-side record of the dictionaries already sent.
#[derive(Debug, Clone)]
pub struct DictionaryTracker {
    emit_deltas: bool,
    allow_replacement: bool,
    written: HashMap<i64, Arc<ArrayData>>,
}

impl DictionaryTracker {
    /// `emit_deltas` sends an extended dictionary as just its new tail.
    /// `allow_replacement` permits redefining an id outright.
    pub fn new(emit_deltas: bool, allow_replacement: bool) -> Self {
        Self {
            emit_deltas,
            allow_replacement,
            written: HashMap::new(),
        }
    }

    /// Dictionaries `batch` needs sent first, in first-use order.
    ///
    /// Nothing is recorded as sent unless every dictionary in the batch is
    /// accepted.
    pub fn collect(&mut self, batch: &RecordBatch) -> Result<Vec<PendingDictionary>, UsageError> {
        let mut used: Vec<(i64, Arc<ArrayData>)> = Vec::new();
        for column in batch.columns() {
            collect_dictionaries(column, &mut used)?;
        }

        let mut pending = Vec::new();
        let mut accepted = Vec::with_capacity(used.len());
        for (id, values) in used {
            match self.written.get(&id) {
                None => pending.push(PendingDictionary {
                    id,
                    values: values.clone(),
                    is_delta: false,
                }),
                Some(prev) if Arc::ptr_eq(prev, &values) || prev == &values => continue,
                Some(prev) => {
                    let delta = if self.emit_deltas
                        && concat::is_prefix(prev, &values).unwrap_or(false)
                    {
                        concat::slice(&values, prev.len(), values.len() - prev.len()).ok()
                    } else {
                        None
                    };
                    match delta {
                        Some(tail) => pending.push(PendingDictionary {
                            id,
                            values: Arc::new(tail),
                            is_delta: true,
                        }),
                        None if self.allow_replacement => pending.push(PendingDictionary {
                            id,
                            values: values.clone(),
                            is_delta: false,
                        }),
                        None => return Err(UsageError::DictionaryReplacement { id }),
                    }
                }
            }
            accepted.push((id, values));
        }
        self.written.extend(accepted);
        Ok(pending)
    }
}

fn collect_dictionaries(
    array: &ArrayData,
    used: &mut Vec<(i64, Arc<ArrayData>)>,
) -> Result<(), UsageError> {
    if let (DataType::Dictionary { id, .. }, Some(values)) = (array.data_type(), array.dictionary())
    {
        match used.iter().find(|(seen, _)| seen == id) {
            Some((_, existing)) if existing != values => {
                return Err(UsageError::ConflictingDictionaries { id: *id })
            }
            Some(_) => {}
            None => used.push((*id, values.clone())),
        }
    }
    for child in array.children() {
        collect_dictionaries(child, used)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageHeader;
    use tabwire_core::IndexType;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::new(
            "color",
            DataType::dictionary(0, IndexType::Int32, DataType::Utf8),
            true,
        )]))
    }

    fn batch(dict: &[&str], keys: &[Option<i64>]) -> RecordBatch {
        let values: Vec<Option<&str>> = dict.iter().map(|s| Some(*s)).collect();
        let dict = Arc::new(ArrayData::from_strs(&values));
        let column = ArrayData::new_dictionary(0, IndexType::Int32, keys, dict).unwrap();
        RecordBatch::try_new(schema(), vec![column]).unwrap()
    }

    fn apply(memo: &mut DictionaryMemo, pending: &PendingDictionary) -> DictionaryUpdate {
        let message = pending.to_message(MetadataVersion::V5);
        match &message.header {
            MessageHeader::DictionaryBatch(header) => memo.apply(header, &message.body).unwrap(),
            other => panic!("unexpected header {:?}", other),
        }
    }

    #[test]
    fn test_first_use_then_skip() {
        let mut tracker = DictionaryTracker::new(true, true);
        let b = batch(&["red", "blue"], &[Some(0), Some(1)]);
        let first = tracker.collect(&b).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!first[0].is_delta);
        assert!(tracker.collect(&b).unwrap().is_empty());
    }

    #[test]
    fn test_delta_emitted_for_extension() {
        let mut tracker = DictionaryTracker::new(true, false);
        tracker.collect(&batch(&["a", "b"], &[Some(0)])).unwrap();
        let pending = tracker
            .collect(&batch(&["a", "b", "c"], &[Some(2)]))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_delta);
        assert_eq!(pending[0].values.len(), 1);
        assert_eq!(pending[0].values.str_value(0), Some("c"));
    }

    #[test]
    fn test_replacement_rules() {
        let mut tracker = DictionaryTracker::new(true, false);
        tracker.collect(&batch(&["a", "b"], &[Some(0)])).unwrap();
        let err = tracker.collect(&batch(&["z"], &[Some(0)])).unwrap_err();
        assert_eq!(err, UsageError::DictionaryReplacement { id: 0 });

        let mut tracker = DictionaryTracker::new(false, true);
        tracker.collect(&batch(&["a"], &[Some(0)])).unwrap();
        let pending = tracker.collect(&batch(&["a", "b"], &[Some(1)])).unwrap();
        assert!(!pending[0].is_delta);
        assert_eq!(pending[0].values.len(), 2);
    }

    #[test]
    fn test_memo_applies_delta() {
        let mut tracker = DictionaryTracker::new(true, true);
        let mut memo = DictionaryMemo::from_schema(&schema());

        let first = tracker.collect(&batch(&["a", "b"], &[Some(0)])).unwrap();
        assert_eq!(apply(&mut memo, &first[0]), DictionaryUpdate::New);
        let before = memo.get(0).unwrap();

        let second = tracker
            .collect(&batch(&["a", "b", "c"], &[Some(2)]))
            .unwrap();
        assert_eq!(apply(&mut memo, &second[0]), DictionaryUpdate::Delta);

        let after = memo.get(0).unwrap();
        assert_eq!(after.len(), 3);
        assert_eq!(after.str_value(2), Some("c"));
        // Earlier handles are untouched.
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn test_memo_rejects_unknown_id_and_orphan_delta() {
        let mut memo = DictionaryMemo::from_schema(&schema());
        let values = Arc::new(ArrayData::from_strs(&[Some("x")]));
        let orphan = PendingDictionary {
            id: 0,
            values: values.clone(),
            is_delta: true,
        };
        let message = orphan.to_message(MetadataVersion::V4);
        if let MessageHeader::DictionaryBatch(header) = &message.header {
            assert!(matches!(
                memo.apply(header, &message.body),
                Err(ProtocolError::DeltaWithoutBase(0))
            ));
        }

        let unknown = PendingDictionary {
            id: 9,
            values,
            is_delta: false,
        };
        let message = unknown.to_message(MetadataVersion::V4);
        if let MessageHeader::DictionaryBatch(header) = &message.header {
            assert!(matches!(
                memo.apply(header, &message.body),
                Err(ProtocolError::UnknownDictionaryId(9))
            ));
        }
    }

    #[test]
    fn test_conflicting_dictionaries_in_one_batch() {
        let schema = Arc::new(Schema::new(vec![
            Field::new(
                "a",
                DataType::dictionary(1, IndexType::Int8, DataType::Utf8),
                true,
            ),
            Field::new(
                "b",
                DataType::dictionary(1, IndexType::Int8, DataType::Utf8),
                true,
            ),
        ]));
        let d1 = Arc::new(ArrayData::from_strs(&[Some("x")]));
        let d2 = Arc::new(ArrayData::from_strs(&[Some("y")]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                ArrayData::new_dictionary(1, IndexType::Int8, &[Some(0)], d1).unwrap(),
                ArrayData::new_dictionary(1, IndexType::Int8, &[Some(0)], d2).unwrap(),
            ],
        )
        .unwrap();
        let mut tracker = DictionaryTracker::new(true, true);
        assert_eq!(
            tracker.collect(&batch).unwrap_err(),
            UsageError::ConflictingDictionaries { id: 1 }
        );
    }
}
