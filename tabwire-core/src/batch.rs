//! Record batches: equal-length columns under one schema.

use crate::array::ArrayData;
use crate::concat;
use crate::datatype::SchemaRef;
use crate::error::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    schema: SchemaRef,
    columns: Vec<ArrayData>,
    num_rows: usize,
}

impl RecordBatch {
    /// Creates a batch, inferring the row count from the first column.
    ///
    /// A batch with no columns has zero rows; use
    /// [`RecordBatch::try_new_with_row_count`] to say otherwise.
    pub fn try_new(schema: SchemaRef, columns: Vec<ArrayData>) -> Result<Self, DataError> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        Self::try_new_with_row_count(schema, columns, num_rows)
    }

    pub fn try_new_with_row_count(
        schema: SchemaRef,
        columns: Vec<ArrayData>,
        num_rows: usize,
    ) -> Result<Self, DataError> {
        if schema.fields.len() != columns.len() {
            return Err(DataError::SchemaMismatch(format!(
                "schema has {} fields but {} columns were given",
                schema.fields.len(),
                columns.len()
            )));
        }
        for (field, column) in schema.fields.iter().zip(&columns) {
            if column.data_type() != &field.data_type {
                return Err(DataError::TypeMismatch {
                    expected: field.data_type.to_string(),
                    actual: column.data_type().to_string(),
                });
            }
            if column.len() != num_rows {
                return Err(DataError::LengthMismatch {
                    column: field.name.clone(),
                    expected: num_rows,
                    actual: column.len(),
                });
            }
            if !field.nullable && column.null_count() > 0 {
                return Err(DataError::SchemaMismatch(format!(
                    "non-nullable column '{}' has {} nulls",
                    field.name,
                    column.null_count()
                )));
            }
        }
        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Zero-row batch with an empty column per field.
    pub fn new_empty(schema: SchemaRef) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| ArrayData::new_empty(&f.data_type))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn columns(&self) -> &[ArrayData] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> Option<&ArrayData> {
        self.columns.get(i)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ArrayData> {
        self.schema.index_of(name).and_then(|i| self.columns.get(i))
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Rows `offset..offset + len` as a new batch.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self, DataError> {
        let columns = self
            .columns
            .iter()
            .map(|c| concat::slice(c, offset, len))
            .collect::<Result<Vec<_>, _>>()?;
        Self::try_new_with_row_count(self.schema.clone(), columns, len)
    }

    /// Same columns under a schema with different metadata.
    pub fn with_schema(self, schema: SchemaRef) -> Result<Self, DataError> {
        if !schema.fields_match(&self.schema) {
            return Err(DataError::SchemaMismatch(
                "replacement schema has different fields".to_string(),
            ));
        }
        Ok(Self { schema, ..self })
    }

    pub fn into_columns(self) -> Vec<ArrayData> {
        self.columns
    }
}
