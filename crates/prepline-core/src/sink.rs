//! Output sinks: Parquet file writer with atomic finalize, NDJSON stream

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use flate2::Compression as GzCompression;
use flate2::write::GzEncoder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::Serialize;

/// Rows per Parquet row group
const MAX_ROW_GROUP_SIZE: usize = 1024 * 1024;

/// Append-capable Parquet writer with atomic tmp→rename.
///
/// Nothing appears at the final path until [`ParquetSink::finalize`]
/// succeeds; an aborted or failed sink leaves no artifact behind.
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

/// Temporary path used while `final_path` is being written
pub fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    final_path.with_file_name(name)
}

impl ParquetSink {
    /// Create a sink that will finalize to `final_path`
    pub fn create(final_path: &Path, schema: SchemaRef, zstd_level: i32) -> io::Result<Self> {
        let tmp_path = tmp_path_for(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(MAX_ROW_GROUP_SIZE)
            .build();

        let file = File::create(&tmp_path)?;
        let writer = match ArrowWriter::try_new(file, schema.clone(), Some(props)) {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(io::Error::other(e));
            }
        };

        Ok(Self {
            writer,
            schema,
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Whether `batch` has exactly the sink's column names and types
    pub fn accepts(&self, batch: &RecordBatch) -> bool {
        let theirs = batch.schema();
        theirs.fields().len() == self.schema.fields().len()
            && theirs
                .fields()
                .iter()
                .zip(self.schema.fields().iter())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type())
    }

    /// Append a record batch; rejects batches whose schema does not match
    pub fn write_batch(&mut self, batch: &RecordBatch) -> io::Result<()> {
        if !self.accepts(batch) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "batch schema does not match sink schema",
            ));
        }
        self.writer.write(batch).map_err(io::Error::other)?;
        self.row_count += batch.num_rows();
        Ok(())
    }

    /// Finalize: flush footer and atomically rename tmp → final.
    ///
    /// On failure the tmp file is removed and the error returned.
    pub fn finalize(self) -> io::Result<usize> {
        let Self {
            writer,
            tmp_path,
            final_path,
            row_count,
            ..
        } = self;
        let result = writer
            .close()
            .map_err(io::Error::other)
            .and_then(|_| fs::rename(&tmp_path, &final_path));
        match result {
            Ok(()) => Ok(row_count),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    /// Discard everything written so far
    pub fn abort(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.writer);
        if let Err(e) = fs::remove_file(&tmp_path) {
            log::warn!("Could not remove {}: {e}", tmp_path.display());
        }
    }
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

/// Remove stale .tmp files left by an interrupted run
pub fn cleanup_tmp_files(output_dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

enum NdjsonOut {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// Newline-delimited JSON writer; gzip-compressed when the path ends in `.gz`
pub struct NdjsonSink {
    out: NdjsonOut,
    path: PathBuf,
    rows: usize,
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl NdjsonSink {
    /// Open `path` for appending
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let buf = BufWriter::new(file);
        let out = if path.extension().is_some_and(|ext| ext == "gz") {
            NdjsonOut::Gzip(GzEncoder::new(buf, GzCompression::default()))
        } else {
            NdjsonOut::Plain(buf)
        };
        Ok(Self {
            out,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one value as a single JSON line
    pub fn write_row<T: Serialize + ?Sized>(&mut self, row: &T) -> io::Result<()> {
        let line = serde_json::to_string(row).map_err(io::Error::other)?;
        let w: &mut dyn Write = match &mut self.out {
            NdjsonOut::Plain(w) => w,
            NdjsonOut::Gzip(w) => w,
        };
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    /// Flush (and write the gzip trailer); returns rows written
    pub fn finish(self) -> io::Result<usize> {
        match self.out {
            NdjsonOut::Plain(mut w) => w.flush()?,
            NdjsonOut::Gzip(gz) => gz.finish()?.flush()?,
        }
        Ok(self.rows)
    }
}
