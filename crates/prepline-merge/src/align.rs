//! Cast shard batches onto the unified schema

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions, new_null_array};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::error::ArrowError;

/// A batch reshaped to the unified column set
#[derive(Debug)]
pub struct Aligned {
    pub batch: RecordBatch,
    /// All columns carry their unified type
    pub conforms: bool,
    /// Columns left in their original type
    pub cast_failures: Vec<String>,
}

impl Aligned {
    /// The batch on `target`, with every column that failed its cast
    /// replaced by nulls. Rows are never lost.
    pub fn conforming(&self, target: &SchemaRef) -> Result<RecordBatch, ArrowError> {
        if self.conforms {
            return Ok(self.batch.clone());
        }
        let rows = self.batch.num_rows();
        let columns = target
            .fields()
            .iter()
            .zip(self.batch.columns())
            .map(|(field, column)| {
                if column.data_type() == field.data_type() {
                    column.clone()
                } else {
                    new_null_array(field.data_type(), rows)
                }
            })
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        RecordBatch::try_new_with_options(target.clone(), columns, &options)
    }
}

/// Reorder `batch` to `target`, casting each column and null-filling missing ones.
///
/// A column whose values cannot be cast keeps its original type, making the
/// result non-conforming rather than failing the shard.
pub fn align_batch(batch: &RecordBatch, target: &SchemaRef) -> Result<Aligned, ArrowError> {
    let rows = batch.num_rows();
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };

    let mut fields = Vec::with_capacity(target.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    let mut cast_failures = Vec::new();

    for field in target.fields() {
        let want = field.data_type();
        let Some(column) = batch.column_by_name(field.name()) else {
            fields.push(field.clone());
            columns.push(new_null_array(want, rows));
            continue;
        };
        if column.data_type() == want {
            fields.push(field.clone());
            columns.push(column.clone());
            continue;
        }

        let cast = if can_cast_types(column.data_type(), want) {
            cast_with_options(column, want, &strict)
        } else {
            Err(ArrowError::CastError(format!(
                "no cast from {} to {want}",
                column.data_type()
            )))
        };
        match cast {
            Ok(array) => {
                fields.push(field.clone());
                columns.push(array);
            }
            Err(e) => {
                log::warn!("Column '{}' kept as {}: {e}", field.name(), column.data_type());
                cast_failures.push(field.name().clone());
                fields.push(Arc::new(Field::new(
                    field.name(),
                    column.data_type().clone(),
                    true,
                )));
                columns.push(column.clone());
            }
        }
    }

    let conforms = cast_failures.is_empty();
    let schema = if conforms {
        target.clone()
    } else {
        Arc::new(Schema::new(fields))
    };
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    let batch = RecordBatch::try_new_with_options(schema, columns, &options)?;
    Ok(Aligned {
        batch,
        conforms,
        cast_failures,
    })
}
