//! Immutable columnar arrays.
//!
//! [`ArrayData`] is the physical representation of one column: a logical
//! type, a length, an optional validity bitmap and the type's buffers.
//!
//! ```text
//! type          buffers                 children   dictionary
//! ------------  ----------------------  ---------  ----------
//! bool          [bits]                  -          -
//! int*/uint*    [values]                -          -
//! float*        [values]                -          -
//! utf8/binary   [i32 offsets, data]     -          -
//! list          [i32 offsets]           [item]     -
//! struct        []                      fields     -
//! dictionary    [keys]                  -          values
//! ```
//!
//! Buffers are [`Bytes`], so arrays decoded from a message body share its
//! allocation instead of copying.

use crate::bitmap::{self, BitmapBuilder};
use crate::datatype::{DataType, Field, IndexType, NativeType};
use crate::error::DataError;
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// One column of typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    data_type: DataType,
    len: usize,
    null_count: usize,
    validity: Option<Bytes>,
    buffers: Vec<Bytes>,
    children: Vec<ArrayData>,
    dictionary: Option<Arc<ArrayData>>,
}

impl ArrayData {
    /// Builds an array from raw parts, validating the physical layout.
    ///
    /// The null count is derived from `validity`. A bitmap with no unset bits
    /// is dropped.
    pub fn try_new(
        data_type: DataType,
        len: usize,
        validity: Option<Bytes>,
        buffers: Vec<Bytes>,
        children: Vec<ArrayData>,
        dictionary: Option<Arc<ArrayData>>,
    ) -> Result<Self, DataError> {
        let (validity, null_count) = match validity {
            Some(bits) => {
                if bits.len() < bitmap::byte_len(len) {
                    return Err(DataError::invalid(
                        &data_type,
                        format!(
                            "validity bitmap has {} bytes, need {}",
                            bits.len(),
                            bitmap::byte_len(len)
                        ),
                    ));
                }
                let nulls = len - bitmap::count_set_bits(&bits, len);
                if nulls == 0 {
                    (None, 0)
                } else {
                    (Some(bits), nulls)
                }
            }
            None => (None, 0),
        };

        let array = Self {
            data_type,
            len,
            null_count,
            validity,
            buffers,
            children,
            dictionary,
        };
        array.validate()?;
        Ok(array)
    }

    fn validate(&self) -> Result<(), DataError> {
        let dt = &self.data_type;
        if !matches!(dt, DataType::Dictionary { .. }) && self.dictionary.is_some() {
            return Err(DataError::invalid(dt, "unexpected dictionary"));
        }
        match dt {
            DataType::Boolean => {
                self.expect_shape(1, 0)?;
                self.expect_buffer_len(0, bitmap::byte_len(self.len))
            }
            DataType::Utf8 | DataType::Binary => {
                self.expect_shape(2, 0)?;
                let offsets = self.validate_offsets(self.buffers[1].len())?;
                if matches!(dt, DataType::Utf8) {
                    let data = &self.buffers[1];
                    for w in offsets.windows(2) {
                        let (start, end) = (w[0] as usize, w[1] as usize);
                        if std::str::from_utf8(&data[start..end]).is_err() {
                            return Err(DataError::invalid(dt, "invalid UTF-8 data"));
                        }
                    }
                }
                Ok(())
            }
            DataType::List(item) => {
                self.expect_shape(1, 1)?;
                let child = &self.children[0];
                if child.data_type != item.data_type {
                    return Err(DataError::TypeMismatch {
                        expected: item.data_type.to_string(),
                        actual: child.data_type.to_string(),
                    });
                }
                self.validate_offsets(child.len)?;
                Ok(())
            }
            DataType::Struct(fields) => {
                self.expect_shape(0, fields.len())?;
                for (field, child) in fields.iter().zip(&self.children) {
                    if child.data_type != field.data_type {
                        return Err(DataError::TypeMismatch {
                            expected: field.data_type.to_string(),
                            actual: child.data_type.to_string(),
                        });
                    }
                    if child.len != self.len {
                        return Err(DataError::LengthMismatch {
                            column: field.name.clone(),
                            expected: self.len,
                            actual: child.len,
                        });
                    }
                }
                Ok(())
            }
            DataType::Dictionary {
                index_type,
                value_type,
                ..
            } => {
                self.expect_shape(1, 0)?;
                let size = self.buffer_size(self.len, index_type.byte_width())?;
                self.expect_buffer_len(0, size)?;
                let dictionary = self
                    .dictionary
                    .as_ref()
                    .ok_or_else(|| DataError::invalid(dt, "missing dictionary values"))?;
                if dictionary.data_type != **value_type {
                    return Err(DataError::TypeMismatch {
                        expected: value_type.to_string(),
                        actual: dictionary.data_type.to_string(),
                    });
                }
                for i in 0..self.len {
                    if let Some(key) = self.dictionary_key(i) {
                        if key < 0 || key as usize >= dictionary.len {
                            return Err(DataError::Dictionary(format!(
                                "key {} at slot {} outside dictionary of length {}",
                                key, i, dictionary.len
                            )));
                        }
                    }
                }
                Ok(())
            }
            _ => {
                let width = dt
                    .primitive_width()
                    .ok_or_else(|| DataError::UnsupportedType(dt.to_string()))?;
                self.expect_shape(1, 0)?;
                self.expect_buffer_len(0, self.buffer_size(self.len, width)?)
            }
        }
    }

    fn expect_shape(&self, buffers: usize, children: usize) -> Result<(), DataError> {
        if self.buffers.len() != buffers {
            return Err(DataError::invalid(
                &self.data_type,
                format!("expected {} buffers, got {}", buffers, self.buffers.len()),
            ));
        }
        if self.children.len() != children {
            return Err(DataError::invalid(
                &self.data_type,
                format!("expected {} children, got {}", children, self.children.len()),
            ));
        }
        Ok(())
    }

    /// Bytes needed for `slots` values of `width`, rejecting lengths that
    /// overflow.
    fn buffer_size(&self, slots: usize, width: usize) -> Result<usize, DataError> {
        slots.checked_mul(width).ok_or_else(|| {
            DataError::invalid(
                &self.data_type,
                format!("length {} overflows the buffer size", self.len),
            )
        })
    }

    fn expect_buffer_len(&self, index: usize, min: usize) -> Result<(), DataError> {
        let actual = self.buffers[index].len();
        if actual < min {
            return Err(DataError::invalid(
                &self.data_type,
                format!("buffer {} has {} bytes, need {}", index, actual, min),
            ));
        }
        Ok(())
    }

    /// Checks the offsets buffer and returns the first `len + 1` offsets.
    fn validate_offsets(&self, limit: usize) -> Result<Vec<i32>, DataError> {
        if self.len == 0 && self.buffers[0].is_empty() {
            return Ok(Vec::new());
        }
        self.expect_buffer_len(0, self.buffer_size(self.len.saturating_add(1), 4)?)?;
        let offsets: Vec<i32> = (0..=self.len)
            .map(|i| i32::read_le(&self.buffers[0][i * 4..]))
            .collect();
        if offsets[0] < 0 {
            return Err(DataError::invalid(&self.data_type, "negative first offset"));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(DataError::invalid(&self.data_type, "offsets not monotonic"));
        }
        if offsets[self.len] as usize > limit {
            return Err(DataError::invalid(
                &self.data_type,
                format!("offset {} exceeds {} values", offsets[self.len], limit),
            ));
        }
        Ok(offsets)
    }

    // ---- builders ----

    /// Primitive array with no nulls.
    pub fn from_values<T: NativeType>(values: &[T]) -> Self {
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for v in values {
            v.write_le(&mut out);
        }
        Self::from_parts_unchecked(T::data_type(), values.len(), None, vec![out.into()])
    }

    /// Primitive array where `None` marks a null slot.
    pub fn from_options<T: NativeType>(values: &[Option<T>]) -> Self {
        let mut validity = BitmapBuilder::with_capacity(values.len());
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for v in values {
            validity.append(v.is_some());
            v.unwrap_or_default().write_le(&mut out);
        }
        Self::from_parts_unchecked(
            T::data_type(),
            values.len(),
            validity.finish_validity(),
            vec![out.into()],
        )
    }

    pub fn from_bools(values: &[Option<bool>]) -> Self {
        let mut validity = BitmapBuilder::with_capacity(values.len());
        let mut bits = BitmapBuilder::with_capacity(values.len());
        for v in values {
            validity.append(v.is_some());
            bits.append(v.unwrap_or(false));
        }
        Self::from_parts_unchecked(
            DataType::Boolean,
            values.len(),
            validity.finish_validity(),
            vec![bits.finish()],
        )
    }

    pub fn from_strs<S: AsRef<str>>(values: &[Option<S>]) -> Self {
        let iter = values
            .iter()
            .map(|v| v.as_ref().map(|s| <S as AsRef<str>>::as_ref(s).as_bytes()));
        Self::from_variable(DataType::Utf8, values.len(), iter)
    }

    pub fn from_binary<B: AsRef<[u8]>>(values: &[Option<B>]) -> Self {
        let iter = values
            .iter()
            .map(|v| v.as_ref().map(|b| <B as AsRef<[u8]>>::as_ref(b)));
        Self::from_variable(DataType::Binary, values.len(), iter)
    }

    fn from_variable<'a>(
        data_type: DataType,
        len: usize,
        values: impl Iterator<Item = Option<&'a [u8]>>,
    ) -> Self {
        let mut validity = BitmapBuilder::with_capacity(len);
        let mut offsets = Vec::with_capacity((len + 1) * 4);
        let mut data = Vec::new();
        0i32.write_le(&mut offsets);
        for v in values {
            validity.append(v.is_some());
            if let Some(bytes) = v {
                data.extend_from_slice(bytes);
            }
            (data.len() as i32).write_le(&mut offsets);
        }
        Self::from_parts_unchecked(
            data_type,
            len,
            validity.finish_validity(),
            vec![offsets.into(), data.into()],
        )
    }

    fn from_parts_unchecked(
        data_type: DataType,
        len: usize,
        validity: Option<Bytes>,
        buffers: Vec<Bytes>,
    ) -> Self {
        let null_count = validity
            .as_ref()
            .map(|bits| len - bitmap::count_set_bits(bits, len))
            .unwrap_or(0);
        Self {
            data_type,
            len,
            null_count,
            validity,
            buffers,
            children: Vec::new(),
            dictionary: None,
        }
    }

    /// List array over `values`; `offsets` has one more entry than the list.
    pub fn new_list(
        item: Field,
        offsets: &[i32],
        valid: Option<&[bool]>,
        values: ArrayData,
    ) -> Result<Self, DataError> {
        let len = offsets.len().saturating_sub(1);
        let mut raw = Vec::with_capacity(offsets.len() * 4);
        for o in offsets {
            o.write_le(&mut raw);
        }
        Self::try_new(
            DataType::List(Box::new(item)),
            len,
            validity_from(valid, len)?,
            vec![raw.into()],
            vec![values],
            None,
        )
    }

    pub fn new_struct(
        fields: Vec<Field>,
        children: Vec<ArrayData>,
        valid: Option<&[bool]>,
    ) -> Result<Self, DataError> {
        let len = children
            .first()
            .map(|c| c.len)
            .or_else(|| valid.map(|v| v.len()))
            .unwrap_or(0);
        Self::try_new(
            DataType::Struct(fields),
            len,
            validity_from(valid, len)?,
            Vec::new(),
            children,
            None,
        )
    }

    /// Dictionary-encoded array; a `None` key marks a null slot.
    pub fn new_dictionary(
        id: i64,
        index_type: IndexType,
        keys: &[Option<i64>],
        dictionary: Arc<ArrayData>,
    ) -> Result<Self, DataError> {
        let mut validity = BitmapBuilder::with_capacity(keys.len());
        let mut raw = Vec::with_capacity(keys.len() * index_type.byte_width());
        for key in keys {
            validity.append(key.is_some());
            let k = key.unwrap_or(0);
            if k > index_type.max_key() {
                return Err(DataError::Dictionary(format!(
                    "key {} does not fit {}",
                    k,
                    index_type.data_type()
                )));
            }
            write_key(index_type, k, &mut raw);
        }
        let data_type = DataType::dictionary(id, index_type, dictionary.data_type.clone());
        Self::try_new(
            data_type,
            keys.len(),
            validity.finish_validity(),
            vec![raw.into()],
            Vec::new(),
            Some(dictionary),
        )
    }

    /// Zero-length array of any type.
    pub fn new_empty(data_type: &DataType) -> Self {
        let (buffers, children, dictionary) = match data_type {
            DataType::Utf8 | DataType::Binary => {
                (vec![Bytes::from_static(&[0; 4]), Bytes::new()], vec![], None)
            }
            DataType::List(item) => (
                vec![Bytes::from_static(&[0; 4])],
                vec![ArrayData::new_empty(&item.data_type)],
                None,
            ),
            DataType::Struct(fields) => (
                vec![],
                fields
                    .iter()
                    .map(|f| ArrayData::new_empty(&f.data_type))
                    .collect(),
                None,
            ),
            DataType::Dictionary { value_type, .. } => (
                vec![Bytes::new()],
                vec![],
                Some(Arc::new(ArrayData::new_empty(value_type))),
            ),
            _ => (vec![Bytes::new()], vec![], None),
        };
        Self {
            data_type: data_type.clone(),
            len: 0,
            null_count: 0,
            validity: None,
            buffers,
            children,
            dictionary,
        }
    }

    /// Same keys, different dictionary. The new dictionary must cover every key.
    pub fn with_dictionary(&self, dictionary: Arc<ArrayData>) -> Result<Self, DataError> {
        let data_type = match &self.data_type {
            DataType::Dictionary {
                id,
                index_type,
                ordered,
                ..
            } => DataType::Dictionary {
                id: *id,
                index_type: *index_type,
                value_type: Box::new(dictionary.data_type.clone()),
                ordered: *ordered,
            },
            other => {
                return Err(DataError::TypeMismatch {
                    expected: "dictionary".to_string(),
                    actual: other.to_string(),
                })
            }
        };
        Self::try_new(
            data_type,
            self.len,
            self.validity.clone(),
            self.buffers.clone(),
            Vec::new(),
            Some(dictionary),
        )
    }

    // ---- accessors ----

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn validity(&self) -> Option<&Bytes> {
        self.validity.as_ref()
    }

    pub fn buffers(&self) -> &[Bytes] {
        &self.buffers
    }

    pub fn children(&self) -> &[ArrayData] {
        &self.children
    }

    pub fn dictionary(&self) -> Option<&Arc<ArrayData>> {
        self.dictionary.as_ref()
    }

    pub fn is_valid(&self, i: usize) -> bool {
        i < self.len
            && self
                .validity
                .as_ref()
                .map(|bits| bitmap::get_bit(bits, i))
                .unwrap_or(true)
    }

    pub fn is_null(&self, i: usize) -> bool {
        !self.is_valid(i)
    }

    /// Value of a primitive slot, `None` when null, out of range or the
    /// wrong native type.
    pub fn value<T: NativeType>(&self, i: usize) -> Option<T> {
        if self.data_type != T::data_type() || !self.is_valid(i) {
            return None;
        }
        Some(T::read_le(&self.buffers[0][i * T::WIDTH..]))
    }

    /// All slots of a primitive array.
    pub fn values<T: NativeType>(&self) -> Result<Vec<Option<T>>, DataError> {
        if self.data_type != T::data_type() {
            return Err(DataError::TypeMismatch {
                expected: T::data_type().to_string(),
                actual: self.data_type.to_string(),
            });
        }
        Ok((0..self.len).map(|i| self.value::<T>(i)).collect())
    }

    pub fn bool_value(&self, i: usize) -> Option<bool> {
        if self.data_type != DataType::Boolean || !self.is_valid(i) {
            return None;
        }
        Some(bitmap::get_bit(&self.buffers[0], i))
    }

    pub fn binary_value(&self, i: usize) -> Option<&[u8]> {
        if !matches!(self.data_type, DataType::Utf8 | DataType::Binary) || !self.is_valid(i) {
            return None;
        }
        let range = self.offset_range(i);
        Some(&self.buffers[1][range])
    }

    pub fn str_value(&self, i: usize) -> Option<&str> {
        if self.data_type != DataType::Utf8 {
            return None;
        }
        self.binary_value(i)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Child range covered by list slot `i`.
    pub fn list_range(&self, i: usize) -> Option<Range<usize>> {
        if !matches!(self.data_type, DataType::List(_)) || !self.is_valid(i) {
            return None;
        }
        Some(self.offset_range(i))
    }

    /// Start and end offsets of slot `i` regardless of validity.
    pub fn offset_range(&self, i: usize) -> Range<usize> {
        if self.buffers[0].is_empty() {
            return 0..0;
        }
        let start = i32::read_le(&self.buffers[0][i * 4..]) as usize;
        let end = i32::read_le(&self.buffers[0][(i + 1) * 4..]) as usize;
        start..end
    }

    pub fn dictionary_key(&self, i: usize) -> Option<i64> {
        let index_type = match &self.data_type {
            DataType::Dictionary { index_type, .. } => *index_type,
            _ => return None,
        };
        if !self.is_valid(i) {
            return None;
        }
        Some(read_key(index_type, &self.buffers[0], i))
    }

    /// Human-readable rendering of slot `i`.
    pub fn format_value(&self, i: usize) -> String {
        if self.is_null(i) {
            return "null".to_string();
        }
        match &self.data_type {
            DataType::Boolean => self.bool_value(i).unwrap_or_default().to_string(),
            DataType::Int8 => fmt_native::<i8>(self, i),
            DataType::Int16 => fmt_native::<i16>(self, i),
            DataType::Int32 => fmt_native::<i32>(self, i),
            DataType::Int64 => fmt_native::<i64>(self, i),
            DataType::UInt8 => fmt_native::<u8>(self, i),
            DataType::UInt16 => fmt_native::<u16>(self, i),
            DataType::UInt32 => fmt_native::<u32>(self, i),
            DataType::UInt64 => fmt_native::<u64>(self, i),
            DataType::Float32 => fmt_native::<f32>(self, i),
            DataType::Float64 => fmt_native::<f64>(self, i),
            DataType::Utf8 => self.str_value(i).unwrap_or_default().to_string(),
            DataType::Binary => self
                .binary_value(i)
                .unwrap_or_default()
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect(),
            DataType::List(_) => {
                let child = &self.children[0];
                let items: Vec<String> = self
                    .offset_range(i)
                    .map(|j| child.format_value(j))
                    .collect();
                format!("[{}]", items.join(", "))
            }
            DataType::Struct(fields) => {
                let items: Vec<String> = fields
                    .iter()
                    .zip(&self.children)
                    .map(|(f, c)| format!("{}: {}", f.name, c.format_value(i)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            DataType::Dictionary { .. } => match (self.dictionary_key(i), &self.dictionary) {
                (Some(key), Some(dict)) => dict.format_value(key as usize),
                _ => "null".to_string(),
            },
        }
    }
}

fn fmt_native<T: NativeType + ToString>(array: &ArrayData, i: usize) -> String {
    array.value::<T>(i).map(|v| v.to_string()).unwrap_or_default()
}

fn validity_from(valid: Option<&[bool]>, len: usize) -> Result<Option<Bytes>, DataError> {
    match valid {
        None => Ok(None),
        Some(flags) => {
            if flags.len() != len {
                return Err(DataError::LengthMismatch {
                    column: "validity".to_string(),
                    expected: len,
                    actual: flags.len(),
                });
            }
            let mut builder = BitmapBuilder::with_capacity(len);
            for &f in flags {
                builder.append(f);
            }
            Ok(builder.finish_validity())
        }
    }
}

pub(crate) fn write_key(index_type: IndexType, key: i64, out: &mut Vec<u8>) {
    match index_type {
        IndexType::Int8 => (key as i8).write_le(out),
        IndexType::Int16 => (key as i16).write_le(out),
        IndexType::Int32 => (key as i32).write_le(out),
        IndexType::Int64 => key.write_le(out),
    }
}

pub(crate) fn read_key(index_type: IndexType, buf: &[u8], i: usize) -> i64 {
    let w = index_type.byte_width();
    let raw = &buf[i * w..];
    match index_type {
        IndexType::Int8 => i8::read_le(raw) as i64,
        IndexType::Int16 => i16::read_le(raw) as i64,
        IndexType::Int32 => i32::read_le(raw) as i64,
        IndexType::Int64 => i64::read_le(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_with_nulls() {
        let array = ArrayData::from_options(&[Some(1i64), None, Some(3)]);
        assert_eq!(array.len(), 3);
        assert_eq!(array.null_count(), 1);
        assert_eq!(array.value::<i64>(0), Some(1));
        assert_eq!(array.value::<i64>(1), None);
        assert_eq!(array.value::<i32>(0), None);
        assert_eq!(array.values::<i64>().unwrap(), vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn test_overflowing_length_rejected() {
        let result = ArrayData::try_new(
            DataType::Int64,
            1 << 61,
            None,
            vec![Bytes::from(vec![0u8; 8])],
            vec![],
            None,
        );
        assert!(matches!(result, Err(DataError::InvalidArray { .. })));

        let result = ArrayData::try_new(
            DataType::Utf8,
            usize::MAX,
            None,
            vec![Bytes::from(vec![0u8; 8]), Bytes::new()],
            vec![],
            None,
        );
        assert!(matches!(result, Err(DataError::InvalidArray { .. })));
    }

    #[test]
    fn test_no_nulls_drops_validity() {
        let array = ArrayData::from_options(&[Some(1.0f64), Some(2.0)]);
        assert!(array.validity().is_none());
        assert_eq!(array, ArrayData::from_values(&[1.0f64, 2.0]));
    }

    #[test]
    fn test_strings() {
        let array = ArrayData::from_strs(&[Some("a"), None, Some("ccc")]);
        assert_eq!(array.str_value(0), Some("a"));
        assert_eq!(array.str_value(1), None);
        assert_eq!(array.str_value(2), Some("ccc"));
        assert_eq!(array.format_value(1), "null");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let offsets: Vec<u8> = [0i32, 2].iter().flat_map(|o| o.to_le_bytes()).collect();
        let err = ArrayData::try_new(
            DataType::Utf8,
            1,
            None,
            vec![offsets.into(), Bytes::from_static(&[0xff, 0xfe])],
            vec![],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = ArrayData::try_new(
            DataType::Int32,
            4,
            None,
            vec![Bytes::from_static(&[0; 8])],
            vec![],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidArray { .. }));
    }

    #[test]
    fn test_list() {
        let values = ArrayData::from_values(&[1i32, 2, 3]);
        let list = ArrayData::new_list(
            Field::new("item", DataType::Int32, true),
            &[0, 2, 2, 3],
            Some(&[true, false, true]),
            values,
        )
        .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.null_count(), 1);
        assert_eq!(list.list_range(0), Some(0..2));
        assert_eq!(list.list_range(1), None);
        assert_eq!(list.format_value(0), "[1, 2]");
    }

    #[test]
    fn test_list_offset_past_child_rejected() {
        let values = ArrayData::from_values(&[1i32]);
        let result = ArrayData::new_list(
            Field::new("item", DataType::Int32, true),
            &[0, 5],
            None,
            values,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_struct() {
        let fields = vec![
            Field::new("x", DataType::Int32, false),
            Field::new("y", DataType::Utf8, true),
        ];
        let array = ArrayData::new_struct(
            fields,
            vec![
                ArrayData::from_values(&[1i32, 2]),
                ArrayData::from_strs(&[Some("a"), Some("b")]),
            ],
            None,
        )
        .unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.format_value(1), "{x: 2, y: b}");
    }

    #[test]
    fn test_struct_length_mismatch() {
        let fields = vec![
            Field::new("x", DataType::Int32, false),
            Field::new("y", DataType::Int32, false),
        ];
        let result = ArrayData::new_struct(
            fields,
            vec![
                ArrayData::from_values(&[1i32, 2]),
                ArrayData::from_values(&[1i32]),
            ],
            None,
        );
        assert!(matches!(result, Err(DataError::LengthMismatch { .. })));
    }

    #[test]
    fn test_dictionary() {
        let dict = Arc::new(ArrayData::from_strs(&[Some("red"), Some("blue")]));
        let array =
            ArrayData::new_dictionary(0, IndexType::Int8, &[Some(1), None, Some(0)], dict).unwrap();
        assert_eq!(array.dictionary_key(0), Some(1));
        assert_eq!(array.dictionary_key(1), None);
        assert_eq!(array.format_value(0), "blue");
        assert_eq!(array.format_value(2), "red");
    }

    #[test]
    fn test_dictionary_key_out_of_range() {
        let dict = Arc::new(ArrayData::from_strs(&[Some("red")]));
        let result = ArrayData::new_dictionary(0, IndexType::Int32, &[Some(3)], dict);
        assert!(matches!(result, Err(DataError::Dictionary(_))));
    }

    #[test]
    fn test_new_empty_is_valid() {
        let types = vec![
            DataType::Boolean,
            DataType::Float32,
            DataType::Utf8,
            DataType::list(DataType::Int64),
            DataType::Struct(vec![Field::new("a", DataType::Binary, true)]),
            DataType::dictionary(1, IndexType::Int16, DataType::Utf8),
        ];
        for dt in types {
            let empty = ArrayData::new_empty(&dt);
            let rebuilt = ArrayData::try_new(
                dt.clone(),
                0,
                None,
                empty.buffers().to_vec(),
                empty.children().to_vec(),
                empty.dictionary().cloned(),
            );
            assert!(rebuilt.is_ok(), "{}", dt);
        }
    }

    #[test]
    fn test_bools() {
        let array = ArrayData::from_bools(&[Some(true), Some(false), None]);
        assert_eq!(array.bool_value(0), Some(true));
        assert_eq!(array.bool_value(1), Some(false));
        assert_eq!(array.bool_value(2), None);
        assert_eq!(array.null_count(), 1);
    }
}
