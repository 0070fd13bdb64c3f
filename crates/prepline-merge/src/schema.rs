//! Schema unification across shards

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::errors::ParquetError;

/// Arrow schema stored in a Parquet file
pub fn read_schema(path: &Path) -> Result<SchemaRef, ParquetError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder.schema().clone())
}

/// Batch reader over a shard, limited to `columns` (by name) when given.
///
/// Requested columns the shard lacks are ignored.
pub fn open_reader(
    path: &Path,
    columns: Option<&[&str]>,
    batch_size: usize,
) -> Result<ParquetRecordBatchReader, ParquetError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let builder = match columns {
        Some(names) => {
            let schema = builder.schema().clone();
            let roots: Vec<usize> = names
                .iter()
                .filter_map(|n| schema.index_of(n).ok())
                .collect();
            let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
            builder.with_projection(mask)
        }
        None => builder,
    };
    builder.with_batch_size(batch_size).build()
}

/// (signed, bit width) of an integer type
fn int_kind(dt: &DataType) -> Option<(bool, u8)> {
    Some(match dt {
        DataType::Int8 => (true, 8),
        DataType::Int16 => (true, 16),
        DataType::Int32 => (true, 32),
        DataType::Int64 => (true, 64),
        DataType::UInt8 => (false, 8),
        DataType::UInt16 => (false, 16),
        DataType::UInt32 => (false, 32),
        DataType::UInt64 => (false, 64),
        _ => return None,
    })
}

fn int_type(signed: bool, bits: u8) -> DataType {
    match (signed, bits) {
        (true, 8) => DataType::Int8,
        (true, 16) => DataType::Int16,
        (true, 32) => DataType::Int32,
        (true, _) => DataType::Int64,
        (false, 8) => DataType::UInt8,
        (false, 16) => DataType::UInt16,
        (false, 32) => DataType::UInt32,
        (false, _) => DataType::UInt64,
    }
}

fn is_float(dt: &DataType) -> bool {
    matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

/// Exact type for any 64-bit integer of either sign
fn wide_int() -> DataType {
    DataType::Decimal128(20, 0)
}

fn is_number(dt: &DataType) -> bool {
    int_kind(dt).is_some() || is_float(dt) || *dt == wide_int()
}

/// Signed type holding every value of an unsigned and a signed integer
fn mixed_sign(a: (bool, u8), b: (bool, u8)) -> DataType {
    let (unsigned, signed) = if a.0 { (b.1, a.1) } else { (a.1, b.1) };
    if unsigned < signed {
        int_type(true, signed)
    } else if unsigned < 64 {
        int_type(true, unsigned * 2)
    } else {
        wide_int()
    }
}

/// Smallest common type two shards' columns can both be cast to.
///
/// Integers of mixed sign widen until both ranges fit, up to a 20-digit
/// decimal. Commutative; conflicts with no numeric or string resolution
/// become Utf8.
pub fn promote(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        _ => match (int_kind(a), int_kind(b)) {
            (Some((sa, wa)), Some((sb, wb))) if sa == sb => int_type(sa, wa.max(wb)),
            (Some(ka), Some(kb)) => mixed_sign(ka, kb),
            (Some(_), None) if *b == wide_int() => wide_int(),
            (None, Some(_)) if *a == wide_int() => wide_int(),
            _ if is_number(a) && is_number(b) => DataType::Float64,
            _ if matches!(a, DataType::LargeUtf8) || matches!(b, DataType::LargeUtf8) => {
                DataType::LargeUtf8
            }
            // Any string side, or an irreconcilable pair
            _ => DataType::Utf8,
        },
    }
}

/// Union of all columns, in order of first appearance, with promoted types.
///
/// Every field is nullable since any shard may lack it.
pub fn unify<'a>(schemas: impl IntoIterator<Item = &'a SchemaRef>) -> SchemaRef {
    let mut fields: Vec<(String, DataType)> = Vec::new();
    for schema in schemas {
        for field in schema.fields() {
            match fields.iter_mut().find(|(name, _)| name == field.name()) {
                Some((_, dt)) => *dt = promote(dt, field.data_type()),
                None => fields.push((field.name().clone(), field.data_type().clone())),
            }
        }
    }
    Arc::new(Schema::new(
        fields
            .into_iter()
            .map(|(name, dt)| Field::new(name, dt, true))
            .collect::<Vec<_>>(),
    ))
}
