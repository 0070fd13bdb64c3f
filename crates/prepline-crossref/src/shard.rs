//! One Parquet shard per completed batch window

use std::io;
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use chrono::NaiveDate;
use prepline_core::{ParquetSink, is_valid_parquet};

use crate::row::{FlatRow, RowAccumulator};

/// `crossref_preprints_<first>_<last>.parquet`
pub fn shard_file_name(first: NaiveDate, last: NaiveDate) -> String {
    format!(
        "crossref_preprints_{}_{}.parquet",
        first.format("%Y-%m-%d"),
        last.format("%Y-%m-%d")
    )
}

/// Writes shards into one directory; committed shards are never touched again
#[derive(Debug, Clone)]
pub struct ShardWriter {
    dir: PathBuf,
    schema: SchemaRef,
    zstd_level: i32,
}

impl ShardWriter {
    pub fn new(dir: &Path, schema: SchemaRef, zstd_level: i32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            schema,
            zstd_level,
        }
    }

    pub fn path_for(&self, first: NaiveDate, last: NaiveDate) -> PathBuf {
        self.dir.join(shard_file_name(first, last))
    }

    /// A readable shard for this batch already exists
    pub fn is_committed(&self, first: NaiveDate, last: NaiveDate) -> bool {
        is_valid_parquet(&self.path_for(first, last))
    }

    /// Write `rows` as the shard for `[first, last]`.
    ///
    /// The file appears only once fully written. Refuses to replace an
    /// existing file.
    pub fn write(&self, first: NaiveDate, last: NaiveDate, rows: &[FlatRow]) -> io::Result<PathBuf> {
        let path = self.path_for(first, last);
        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("shard {} already exists", path.display()),
            ));
        }

        let mut acc = RowAccumulator::new(self.schema.clone()).map_err(io::Error::other)?;
        let mut sink = ParquetSink::create(&path, self.schema.clone(), self.zstd_level)?;

        let result = (|| -> io::Result<()> {
            for row in rows {
                acc.push(row);
                if acc.is_full() {
                    sink.write_batch(&acc.take_batch().map_err(io::Error::other)?)?;
                }
            }
            if !acc.is_empty() {
                sink.write_batch(&acc.take_batch().map_err(io::Error::other)?)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                let written = sink.finalize()?;
                log::debug!("Shard {} committed ({written} rows)", path.display());
                Ok(path)
            }
            Err(e) => {
                sink.abort();
                Err(e)
            }
        }
    }
}
