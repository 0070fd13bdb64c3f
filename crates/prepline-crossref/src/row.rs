//! Flat rows and their columnar accumulation

use arrow::array::{ArrayBuilder, ArrayRef, Float64Builder, Int64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::error::ArrowError;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Rows buffered before a `RecordBatch` is cut
pub const RECORD_BATCH_SIZE: usize = 8192;

/// One scalar value of a flat row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Cell {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<String>> for Cell {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::Text)
    }
}

impl From<Option<i64>> for Cell {
    fn from(v: Option<i64>) -> Self {
        v.map_or(Self::Null, Self::Int)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Null, Self::Float)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => s.serialize_none(),
            Self::Text(v) => s.serialize_str(v),
            Self::Int(v) => s.serialize_i64(*v),
            Self::Float(v) => s.serialize_f64(*v),
        }
    }
}

/// Ordered column → cell mapping for one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    cells: Vec<(&'static str, Cell)>,
}

impl FlatRow {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            cells: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, column: &'static str, cell: impl Into<Cell>) {
        self.cells.push((column, cell.into()));
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find_map(|(name, cell)| (*name == column).then_some(cell))
    }

    pub fn doi(&self) -> Option<&str> {
        self.get("doi").and_then(Cell::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Cell)> {
        self.cells.iter().map(|(n, c)| (*n, c))
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

enum ColumnBuilder {
    Text(StringBuilder),
    Int(Int64Builder),
    Float(Float64Builder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType) -> Result<Self, ArrowError> {
        Ok(match data_type {
            DataType::Utf8 => Self::Text(StringBuilder::with_capacity(RECORD_BATCH_SIZE, 0)),
            DataType::Int64 => Self::Int(Int64Builder::with_capacity(RECORD_BATCH_SIZE)),
            DataType::Float64 => Self::Float(Float64Builder::with_capacity(RECORD_BATCH_SIZE)),
            other => {
                return Err(ArrowError::SchemaError(format!(
                    "unsupported row column type {other}"
                )))
            }
        })
    }

    /// Append `cell`, coercing where lossless; anything else becomes null
    fn append(&mut self, cell: Option<&Cell>) {
        match (self, cell) {
            (Self::Text(b), Some(Cell::Text(v))) => b.append_value(v),
            (Self::Text(b), Some(Cell::Int(v))) => b.append_value(v.to_string()),
            (Self::Text(b), Some(Cell::Float(v))) => b.append_value(v.to_string()),
            (Self::Int(b), Some(Cell::Int(v))) => b.append_value(*v),
            (Self::Float(b), Some(Cell::Float(v))) => b.append_value(*v),
            (Self::Float(b), Some(Cell::Int(v))) => b.append_value(*v as f64),
            (Self::Text(b), _) => b.append_null(),
            (Self::Int(b), _) => b.append_null(),
            (Self::Float(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Text(b) => ArrayBuilder::finish(b),
            Self::Int(b) => ArrayBuilder::finish(b),
            Self::Float(b) => ArrayBuilder::finish(b),
        }
    }
}

/// Buffers [`FlatRow`]s column-wise against a fixed schema
pub struct RowAccumulator {
    schema: SchemaRef,
    columns: Vec<ColumnBuilder>,
    len: usize,
}

impl RowAccumulator {
    pub fn new(schema: SchemaRef) -> Result<Self, ArrowError> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::for_type(f.data_type()))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            schema,
            columns,
            len: 0,
        })
    }

    /// Append one row. Cells are matched to columns by position when the
    /// names line up, by name otherwise; unknown cells are ignored.
    pub fn push(&mut self, row: &FlatRow) {
        for (i, (field, column)) in self.schema.fields().iter().zip(&mut self.columns).enumerate() {
            let cell = match row.cells.get(i) {
                Some((name, cell)) if *name == field.name().as_str() => Some(cell),
                _ => row.get(field.name()),
            };
            column.append(cell);
        }
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= RECORD_BATCH_SIZE
    }

    /// Take buffered rows as a RecordBatch, resetting internal state
    pub fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let arrays: Vec<ArrayRef> = self.columns.iter_mut().map(ColumnBuilder::finish).collect();
        self.len = 0;
        RecordBatch::try_new(self.schema.clone(), arrays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("doi", DataType::Utf8, false),
            Field::new("count", DataType::Int64, true),
            Field::new("score", DataType::Float64, true),
        ]))
    }

    fn row(doi: &str, count: Option<i64>, score: Option<f64>) -> FlatRow {
        let mut r = FlatRow::with_capacity(3);
        r.push("doi", Some(doi.to_string()));
        r.push("count", count);
        r.push("score", score);
        r
    }

    #[test]
    fn flat_row_lookup() {
        let r = row("10.1/a", Some(3), None);
        assert_eq!(r.doi(), Some("10.1/a"));
        assert_eq!(r.get("count"), Some(&Cell::Int(3)));
        assert_eq!(r.get("score"), Some(&Cell::Null));
        assert!(r.get("missing").is_none());
    }

    #[test]
    fn flat_row_serializes_in_order() {
        let json = serde_json::to_string(&row("10.1/a", Some(3), Some(1.5))).unwrap();
        assert_eq!(json, r#"{"doi":"10.1/a","count":3,"score":1.5}"#);
    }

    #[test]
    fn accumulator_builds_typed_columns() {
        let mut acc = RowAccumulator::new(schema()).unwrap();
        acc.push(&row("10.1/a", Some(3), Some(1.5)));
        acc.push(&row("10.1/b", None, None));
        assert_eq!(acc.len(), 2);

        let batch = acc.take_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert!(acc.is_empty());

        let dois = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(dois.value(1), "10.1/b");
        let counts = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(counts.value(0), 3);
        assert!(counts.is_null(1));
        let scores = batch.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(scores.value(0), 1.5);
    }

    #[test]
    fn accumulator_matches_out_of_order_cells_by_name() {
        let mut r = FlatRow::default();
        r.push("score", Some(2.0_f64));
        r.push("doi", Some("10.1/x".to_string()));
        let mut acc = RowAccumulator::new(schema()).unwrap();
        acc.push(&r);
        let batch = acc.take_batch().unwrap();
        let dois = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(dois.value(0), "10.1/x");
        assert!(batch.column(1).is_null(0));
    }

    #[test]
    fn unsupported_type_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("flag", DataType::Boolean, true)]));
        assert!(RowAccumulator::new(schema).is_err());
    }
}
