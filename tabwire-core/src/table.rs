//! Tables: a schema plus an ordered sequence of record batches.

use crate::array::ArrayData;
use crate::batch::RecordBatch;
use crate::concat;
use crate::datatype::SchemaRef;
use crate::error::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Every batch must carry the table's fields; schema metadata may differ.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, DataError> {
        for (i, batch) in batches.iter().enumerate() {
            if !batch.schema().fields_match(&schema) {
                return Err(DataError::SchemaMismatch(format!(
                    "batch {} does not match table schema",
                    i
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields.len()
    }

    /// Concatenated chunks of column `i`.
    pub fn column(&self, i: usize) -> Result<ArrayData, DataError> {
        let field = self.schema.fields.get(i).ok_or(DataError::OutOfBounds {
            index: i,
            len: self.schema.fields.len(),
        })?;
        if self.batches.is_empty() {
            return Ok(ArrayData::new_empty(&field.data_type));
        }
        let chunks: Vec<&ArrayData> = self
            .batches
            .iter()
            .filter_map(|b| b.column(i))
            .collect();
        concat::concat(&chunks)
    }

    /// Merges all batches into a single batch.
    pub fn combine_chunks(&self) -> Result<RecordBatch, DataError> {
        let columns = (0..self.num_columns())
            .map(|i| self.column(i))
            .collect::<Result<Vec<_>, _>>()?;
        RecordBatch::try_new_with_row_count(self.schema.clone(), columns, self.num_rows())
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }
}
