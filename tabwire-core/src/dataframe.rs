//! Minimal data frame and its conversion to and from record batches.
//!
//! A [`DataFrame`] is a row index plus named columns. Converting it to a
//! batch follows an index-preservation policy:
//!
//! ```text
//! preserve_index   range index              value index
//! --------------   ----------------------   -------------------------
//! None             schema metadata only     column __index_level_0__
//! Some(true)       column __index_level_0__ column __index_level_0__
//! Some(false)      dropped                  dropped
//! ```
//!
//! Where the index went is recorded under [`INDEX_METADATA_KEY`] so the
//! reverse conversion can restore it.

use crate::array::ArrayData;
use crate::batch::RecordBatch;
use crate::datatype::{Field, Schema};
use crate::error::DataError;
use crate::table::Table;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Schema metadata key describing how the index was stored.
pub const INDEX_METADATA_KEY: &str = "tabwire.index";

/// Column name used when the index is stored as a column.
pub const INDEX_COLUMN_NAME: &str = "__index_level_0__";

/// Row labels of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Range {
        start: i64,
        stop: i64,
        step: i64,
        name: Option<String>,
    },
    Values {
        name: Option<String>,
        values: ArrayData,
    },
}

impl Index {
    /// `0..len` with step 1.
    pub fn default_range(len: usize) -> Self {
        Index::Range {
            start: 0,
            stop: len as i64,
            step: 1,
            name: None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Index::Range {
                start, stop, step, ..
            } => range_len(*start, *stop, *step),
            Index::Values { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Index::Range { name, .. } | Index::Values { name, .. } => name.as_deref(),
        }
    }

    fn materialize(&self) -> ArrayData {
        match self {
            Index::Range {
                start, stop, step, ..
            } => {
                let len = range_len(*start, *stop, *step);
                let values: Vec<i64> = (0..len as i64).map(|i| start + i * step).collect();
                ArrayData::from_values(&values)
            }
            Index::Values { values, .. } => values.clone(),
        }
    }
}

fn range_len(start: i64, stop: i64, step: i64) -> usize {
    if step > 0 && stop > start {
        ((stop - start + step - 1) / step) as usize
    } else if step < 0 && stop < start {
        ((start - stop - step - 1) / -step) as usize
    } else {
        0
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IndexMetadata {
    Range {
        start: i64,
        stop: i64,
        step: i64,
        #[serde(default)]
        name: Option<String>,
    },
    Column {
        column: String,
        #[serde(default)]
        name: Option<String>,
    },
}

/// An index plus named, equal-length columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    index: Index,
    columns: Vec<(String, ArrayData)>,
}

impl DataFrame {
    /// Frame with a default range index.
    pub fn new(columns: Vec<(String, ArrayData)>) -> Result<Self, DataError> {
        let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        Self::with_index(Index::default_range(len), columns)
    }

    pub fn with_index(index: Index, columns: Vec<(String, ArrayData)>) -> Result<Self, DataError> {
        if let Index::Range { step: 0, .. } = index {
            return Err(DataError::Conversion("range index step is zero".to_string()));
        }
        let len = index.len();
        for (name, column) in &columns {
            if column.len() != len {
                return Err(DataError::LengthMismatch {
                    column: name.clone(),
                    expected: len,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { index, columns })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn columns(&self) -> &[(String, ArrayData)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ArrayData> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }
}

/// Options for frame to batch conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToBatchOptions {
    /// Worker threads for the per-column step. `None` uses the global pool.
    pub nthreads: Option<usize>,
    pub preserve_index: Option<bool>,
}

/// Options for table to frame conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FromTableOptions {
    pub use_threads: bool,
}

impl Default for FromTableOptions {
    fn default() -> Self {
        Self { use_threads: true }
    }
}

/// Conversion between a host frame type and record batches.
pub trait FrameConversion: Sized {
    fn to_record_batch(&self, options: &ToBatchOptions) -> Result<RecordBatch, DataError>;

    fn from_table(table: &Table, options: &FromTableOptions) -> Result<Self, DataError>;
}

impl FrameConversion for DataFrame {
    fn to_record_batch(&self, options: &ToBatchOptions) -> Result<RecordBatch, DataError> {
        let parallelism = match options.nthreads {
            None => Parallelism::Global,
            Some(0) | Some(1) => Parallelism::Sequential,
            Some(n) => Parallelism::Pool(n),
        };
        let mut pairs = run_columns(parallelism, self.columns.len(), |i| {
            let (name, column) = &self.columns[i];
            Ok((
                Field::new(name.clone(), column.data_type().clone(), true),
                column.clone(),
            ))
        })?;

        let mut schema = Schema::empty();
        let placement = match (&self.index, options.preserve_index) {
            (_, Some(false)) => None,
            (
                Index::Range {
                    start,
                    stop,
                    step,
                    name,
                },
                None,
            ) => Some(IndexMetadata::Range {
                start: *start,
                stop: *stop,
                step: *step,
                name: name.clone(),
            }),
            (index, _) => {
                if self.column(INDEX_COLUMN_NAME).is_some() {
                    return Err(DataError::SchemaMismatch(format!(
                        "column '{}' collides with the stored index",
                        INDEX_COLUMN_NAME
                    )));
                }
                let values = index.materialize();
                pairs.push((
                    Field::new(INDEX_COLUMN_NAME, values.data_type().clone(), true),
                    values,
                ));
                Some(IndexMetadata::Column {
                    column: INDEX_COLUMN_NAME.to_string(),
                    name: index.name().map(str::to_string),
                })
            }
        };
        if let Some(placement) = placement {
            schema.metadata.insert(
                INDEX_METADATA_KEY.to_string(),
                serde_json::to_string(&placement)?,
            );
        }

        let (fields, columns): (Vec<Field>, Vec<ArrayData>) = pairs.into_iter().unzip();
        schema.fields = fields;
        debug!(
            "Converted frame to batch: {} columns, {} rows",
            columns.len(),
            self.num_rows()
        );
        RecordBatch::try_new_with_row_count(Arc::new(schema), columns, self.num_rows())
    }

    fn from_table(table: &Table, options: &FromTableOptions) -> Result<Self, DataError> {
        let parallelism = if options.use_threads {
            Parallelism::Global
        } else {
            Parallelism::Sequential
        };
        let schema = table.schema();
        let mut columns = run_columns(parallelism, schema.fields.len(), |i| {
            Ok((schema.fields[i].name.clone(), table.column(i)?))
        })?;
        let num_rows = table.num_rows();

        let placement = schema
            .metadata
            .get(INDEX_METADATA_KEY)
            .map(|raw| serde_json::from_str::<IndexMetadata>(raw))
            .transpose()?;
        let index = match placement {
            None => Index::default_range(num_rows),
            Some(IndexMetadata::Range {
                start,
                stop,
                step,
                name,
            }) => {
                if range_len(start, stop, step) != num_rows {
                    return Err(DataError::Conversion(format!(
                        "range index covers {} rows, table has {}",
                        range_len(start, stop, step),
                        num_rows
                    )));
                }
                Index::Range {
                    start,
                    stop,
                    step,
                    name,
                }
            }
            Some(IndexMetadata::Column { column, name }) => {
                let pos = columns
                    .iter()
                    .position(|(n, _)| *n == column)
                    .ok_or_else(|| DataError::ColumnNotFound(column.clone()))?;
                let (_, values) = columns.remove(pos);
                Index::Values { name, values }
            }
        };
        debug!(
            "Converted table to frame: {} columns, {} rows",
            columns.len(),
            num_rows
        );
        DataFrame::with_index(index, columns)
    }
}

enum Parallelism {
    Sequential,
    Global,
    Pool(usize),
}

/// Runs `f` for every column index, preserving order.
fn run_columns<T, F>(parallelism: Parallelism, count: usize, f: F) -> Result<Vec<T>, DataError>
where
    T: Send,
    F: Fn(usize) -> Result<T, DataError> + Sync + Send,
{
    match parallelism {
        Parallelism::Sequential => (0..count).map(f).collect(),
        Parallelism::Global => (0..count).into_par_iter().map(f).collect(),
        Parallelism::Pool(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| DataError::Conversion(format!("thread pool: {}", e)))?;
            pool.install(|| (0..count).into_par_iter().map(f).collect())
        }
    }
}
