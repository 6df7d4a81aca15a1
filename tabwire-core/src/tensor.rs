//! Dense n-dimensional numeric tensors.

use crate::datatype::{DataType, NativeType};
use crate::error::DataError;
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub value_type: DataType,
    pub shape: Vec<usize>,
    /// Byte strides per dimension.
    pub strides: Vec<usize>,
    pub dim_names: Vec<Option<String>>,
    pub data: Bytes,
}

impl Tensor {
    /// Validates that `data` covers every element reachable through `strides`.
    pub fn try_new(
        value_type: DataType,
        shape: Vec<usize>,
        strides: Option<Vec<usize>>,
        dim_names: Option<Vec<Option<String>>>,
        data: Bytes,
    ) -> Result<Self, DataError> {
        let width = value_type.primitive_width().ok_or_else(|| {
            DataError::InvalidTensor(format!("{} is not a fixed-width numeric type", value_type))
        })?;
        let strides = strides.unwrap_or_else(|| row_major_strides(&shape, width));
        if strides.len() != shape.len() {
            return Err(DataError::InvalidTensor(format!(
                "{} strides for {} dimensions",
                strides.len(),
                shape.len()
            )));
        }
        let dim_names = dim_names.unwrap_or_else(|| vec![None; shape.len()]);
        if dim_names.len() != shape.len() {
            return Err(DataError::InvalidTensor(format!(
                "{} dimension names for {} dimensions",
                dim_names.len(),
                shape.len()
            )));
        }
        let required = if shape.iter().any(|d| *d == 0) {
            0
        } else {
            shape
                .iter()
                .zip(&strides)
                .map(|(d, s)| (d - 1) * s)
                .sum::<usize>()
                + width
        };
        if data.len() < required {
            return Err(DataError::InvalidTensor(format!(
                "data has {} bytes, need {}",
                data.len(),
                required
            )));
        }
        Ok(Self {
            value_type,
            shape,
            strides,
            dim_names,
            data,
        })
    }

    /// Row-major tensor from a flat slice of values.
    pub fn from_values<T: NativeType>(shape: Vec<usize>, values: &[T]) -> Result<Self, DataError> {
        let size: usize = shape.iter().product();
        if size != values.len() {
            return Err(DataError::InvalidTensor(format!(
                "shape holds {} elements but {} were given",
                size,
                values.len()
            )));
        }
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for v in values {
            v.write_le(&mut out);
        }
        Self::try_new(T::data_type(), shape, None, None, out.into())
    }

    pub fn with_dim_names(mut self, names: Vec<Option<String>>) -> Result<Self, DataError> {
        if names.len() != self.shape.len() {
            return Err(DataError::InvalidTensor(format!(
                "{} dimension names for {} dimensions",
                names.len(),
                self.shape.len()
            )));
        }
        self.dim_names = names;
        Ok(self)
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_contiguous(&self) -> bool {
        self.value_type
            .primitive_width()
            .map(|w| row_major_strides(&self.shape, w) == self.strides)
            .unwrap_or(false)
    }

    /// Element at a multi-dimensional index.
    pub fn value<T: NativeType>(&self, index: &[usize]) -> Option<T> {
        if T::data_type() != self.value_type || index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for ((i, d), s) in index.iter().zip(&self.shape).zip(&self.strides) {
            if i >= d {
                return None;
            }
            offset += i * s;
        }
        Some(T::read_le(&self.data[offset..offset + T::WIDTH]))
    }
}

pub fn row_major_strides(shape: &[usize], width: usize) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = width;
    for (i, d) in shape.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *d;
    }
    strides
}
