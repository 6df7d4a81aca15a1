//! Concatenation and slicing of arrays.
//!
//! Both operations copy into fresh buffers. When concatenating dictionary
//! arrays whose dictionaries differ, the dictionaries are unified: a
//! dictionary that extends the one seen so far replaces it, anything else is
//! appended and its keys are shifted.

use crate::array::{read_key, write_key, ArrayData};
use crate::bitmap::{self, BitmapBuilder};
use crate::datatype::{DataType, IndexType};
use crate::error::DataError;
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// Concatenates arrays of the same type into one.
pub fn concat(arrays: &[&ArrayData]) -> Result<ArrayData, DataError> {
    let first = arrays
        .first()
        .ok_or_else(|| DataError::Conversion("cannot concatenate zero arrays".to_string()))?;
    let data_type = first.data_type();
    for array in &arrays[1..] {
        if array.data_type() != data_type {
            return Err(DataError::TypeMismatch {
                expected: data_type.to_string(),
                actual: array.data_type().to_string(),
            });
        }
    }
    let parts: Vec<(&ArrayData, Range<usize>)> = arrays.iter().map(|a| (*a, 0..a.len())).collect();
    copy_ranges(data_type, &parts)
}

/// Copies `len` slots starting at `offset`.
pub fn slice(array: &ArrayData, offset: usize, len: usize) -> Result<ArrayData, DataError> {
    let end = offset.checked_add(len).unwrap_or(usize::MAX);
    if end > array.len() {
        return Err(DataError::OutOfBounds {
            index: end,
            len: array.len(),
        });
    }
    copy_ranges(array.data_type(), &[(array, offset..end)])
}

fn copy_ranges(
    data_type: &DataType,
    parts: &[(&ArrayData, Range<usize>)],
) -> Result<ArrayData, DataError> {
    let len: usize = parts.iter().map(|(_, r)| r.len()).sum();

    let mut validity = BitmapBuilder::with_capacity(len);
    for (array, range) in parts {
        for i in range.clone() {
            validity.append(array.is_valid(i));
        }
    }
    let validity = validity.finish_validity();

    match data_type {
        DataType::Boolean => {
            let mut bits = BitmapBuilder::with_capacity(len);
            for (array, range) in parts {
                let src = &array.buffers()[0];
                for i in range.clone() {
                    bits.append(bitmap::get_bit(src, i));
                }
            }
            ArrayData::try_new(
                data_type.clone(),
                len,
                validity,
                vec![bits.finish()],
                vec![],
                None,
            )
        }
        DataType::Utf8 | DataType::Binary => {
            let mut offsets = OffsetBuilder::new(len);
            let mut data = Vec::new();
            for (array, range) in parts {
                let src = &array.buffers()[1];
                for i in range.clone() {
                    data.extend_from_slice(&src[array.offset_range(i)]);
                    offsets.push(data.len())?;
                }
            }
            ArrayData::try_new(
                data_type.clone(),
                len,
                validity,
                vec![offsets.finish(), data.into()],
                vec![],
                None,
            )
        }
        DataType::List(item) => {
            let mut offsets = OffsetBuilder::new(len);
            let mut child_parts = Vec::with_capacity(parts.len());
            let mut total = 0usize;
            for (array, range) in parts {
                if range.is_empty() {
                    continue;
                }
                let start = array.offset_range(range.start).start;
                let end = array.offset_range(range.end - 1).end;
                for i in range.clone() {
                    total += array.offset_range(i).len();
                    offsets.push(total)?;
                }
                child_parts.push((&array.children()[0], start..end));
            }
            let child = copy_ranges(&item.data_type, &child_parts)?;
            ArrayData::try_new(
                data_type.clone(),
                len,
                validity,
                vec![offsets.finish()],
                vec![child],
                None,
            )
        }
        DataType::Struct(fields) => {
            let mut children = Vec::with_capacity(fields.len());
            for (k, field) in fields.iter().enumerate() {
                let child_parts: Vec<(&ArrayData, Range<usize>)> = parts
                    .iter()
                    .map(|(array, range)| (&array.children()[k], range.clone()))
                    .collect();
                children.push(copy_ranges(&field.data_type, &child_parts)?);
            }
            ArrayData::try_new(data_type.clone(), len, validity, vec![], children, None)
        }
        DataType::Dictionary {
            index_type,
            value_type,
            ..
        } => {
            let mut merged: Option<Arc<ArrayData>> = None;
            let mut keys = Vec::with_capacity(len * index_type.byte_width());
            for (array, range) in parts {
                let dictionary = array
                    .dictionary()
                    .ok_or_else(|| DataError::invalid(data_type, "missing dictionary values"))?;
                let shift = unify_dictionary(&mut merged, dictionary)?;
                let src = &array.buffers()[0];
                for i in range.clone() {
                    let key = if array.is_valid(i) {
                        shift_key(*index_type, read_key(*index_type, src, i), shift)?
                    } else {
                        0
                    };
                    write_key(*index_type, key, &mut keys);
                }
            }
            let dictionary =
                merged.unwrap_or_else(|| Arc::new(ArrayData::new_empty(value_type)));
            ArrayData::try_new(
                data_type.clone(),
                len,
                validity,
                vec![keys.into()],
                vec![],
                Some(dictionary),
            )
        }
        _ => {
            let width = data_type
                .primitive_width()
                .ok_or_else(|| DataError::UnsupportedType(data_type.to_string()))?;
            let mut out = Vec::with_capacity(len * width);
            for (array, range) in parts {
                let src = &array.buffers()[0];
                out.extend_from_slice(&src[range.start * width..range.end * width]);
            }
            ArrayData::try_new(data_type.clone(), len, validity, vec![out.into()], vec![], None)
        }
    }
}

/// Folds `next` into the running dictionary, returning the key shift for
/// arrays that reference `next`.
fn unify_dictionary(
    merged: &mut Option<Arc<ArrayData>>,
    next: &Arc<ArrayData>,
) -> Result<usize, DataError> {
    let current = match merged {
        None => {
            *merged = Some(next.clone());
            return Ok(0);
        }
        Some(current) => current.clone(),
    };
    if Arc::ptr_eq(&current, next) || current == *next {
        return Ok(0);
    }
    if is_prefix(&current, next)? {
        *merged = Some(next.clone());
        return Ok(0);
    }
    if is_prefix(next, &current)? {
        return Ok(0);
    }
    let shift = current.len();
    *merged = Some(Arc::new(concat(&[&current, next])?));
    Ok(shift)
}

/// True when `prefix` equals the first `prefix.len()` values of `full`.
pub fn is_prefix(prefix: &ArrayData, full: &ArrayData) -> Result<bool, DataError> {
    if prefix.data_type() != full.data_type() || prefix.len() > full.len() {
        return Ok(false);
    }
    Ok(slice(full, 0, prefix.len())? == *prefix)
}

fn shift_key(index_type: IndexType, key: i64, shift: usize) -> Result<i64, DataError> {
    let shifted = key
        .checked_add(shift as i64)
        .filter(|k| *k <= index_type.max_key())
        .ok_or_else(|| {
            DataError::Dictionary(format!(
                "unified dictionary overflows {} keys",
                index_type.data_type()
            ))
        })?;
    Ok(shifted)
}

struct OffsetBuilder {
    raw: Vec<u8>,
}

impl OffsetBuilder {
    fn new(len: usize) -> Self {
        let mut raw = Vec::with_capacity((len + 1) * 4);
        raw.extend_from_slice(&0i32.to_le_bytes());
        Self { raw }
    }

    fn push(&mut self, offset: usize) -> Result<(), DataError> {
        let offset = i32::try_from(offset)
            .map_err(|_| DataError::Conversion(format!("offset {} exceeds i32", offset)))?;
        self.raw.extend_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    fn finish(self) -> Bytes {
        self.raw.into()
    }
}
