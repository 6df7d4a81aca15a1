//! # tabwire-core
//!
//! Columnar data model for tabwire.
//!
//! This crate provides:
//! - Logical types, fields and schemas
//! - Immutable arrays with validity, offsets and value buffers
//! - Record batches, tables and dense tensors
//! - Concatenation, slicing and dictionary unification
//! - Data frame conversion used by the tabular round trip

pub mod array;
pub mod batch;
pub mod bitmap;
pub mod concat;
pub mod dataframe;
pub mod datatype;
pub mod error;
pub mod table;
pub mod tensor;

pub use array::ArrayData;
pub use batch::RecordBatch;
pub use concat::{concat, is_prefix, slice};
pub use dataframe::{
    DataFrame, FrameConversion, FromTableOptions, Index, ToBatchOptions, INDEX_COLUMN_NAME,
    INDEX_METADATA_KEY,
};
pub use datatype::{DataType, Field, IndexType, NativeType, Schema, SchemaRef};
pub use error::DataError;
pub use table::Table;
pub use tensor::Tensor;
