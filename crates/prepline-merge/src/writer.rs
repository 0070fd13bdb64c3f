//! Merged outputs: one Parquet file plus an optional CSV mirror

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::csv::{Writer as CsvWriter, WriterBuilder};
use arrow::datatypes::SchemaRef;
use prepline_core::ParquetSink;

use crate::align::Aligned;

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Could not remove partial {}: {e}", path.display());
    }
}

struct CsvMirror {
    writer: CsvWriter<BufWriter<File>>,
    path: PathBuf,
    chunk_rows: usize,
}

impl CsvMirror {
    fn create(path: &Path, chunk_rows: usize) -> io::Result<Self> {
        let file = File::create(path)?;
        let writer = WriterBuilder::new()
            .with_header(true)
            .build(BufWriter::new(file));
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            chunk_rows: chunk_rows.max(1),
        })
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<(), arrow::error::ArrowError> {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = self.chunk_rows.min(batch.num_rows() - offset);
            self.writer.write(&batch.slice(offset, len))?;
            offset += len;
        }
        Ok(())
    }

    fn finish(self) -> io::Result<PathBuf> {
        let mut inner = self.writer.into_inner();
        match inner.flush() {
            Ok(()) => Ok(self.path),
            Err(e) => {
                drop(inner);
                remove_partial(&self.path);
                Err(e)
            }
        }
    }

    /// Close and delete the file
    fn discard(self) {
        drop(self.writer);
        remove_partial(&self.path);
    }
}

/// Files a merge completed, with the rows each holds
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutputs {
    pub parquet: Option<PathBuf>,
    pub csv: Option<PathBuf>,
    pub parquet_rows: usize,
    pub csv_rows: usize,
}

impl MergeOutputs {
    /// Rows in the merged dataset: the Parquet file when it was completed,
    /// otherwise the CSV mirror
    pub fn rows_written(&self) -> usize {
        if self.parquet.is_some() {
            self.parquet_rows
        } else if self.csv.is_some() {
            self.csv_rows
        } else {
            0
        }
    }
}

/// Where a merge writes, and what became of each output
pub struct MergeWriter {
    schema: SchemaRef,
    parquet: Option<ParquetSink>,
    csv: Option<CsvMirror>,
    csv_rows: usize,
    nulled_batches: usize,
}

impl MergeWriter {
    /// Open the requested outputs. An output that cannot be opened is
    /// logged and skipped; the other still gets written.
    pub fn open(
        parquet_path: Option<&Path>,
        csv_path: Option<&Path>,
        schema: &SchemaRef,
        zstd_level: i32,
        csv_chunk_rows: usize,
    ) -> Self {
        let parquet = parquet_path.and_then(|path| {
            ParquetSink::create(path, schema.clone(), zstd_level)
                .map_err(|e| log::warn!("Parquet output skipped, cannot open {}: {e}", path.display()))
                .ok()
        });
        let csv = csv_path.and_then(|path| {
            CsvMirror::create(path, csv_chunk_rows)
                .map_err(|e| log::warn!("CSV output skipped, cannot open {}: {e}", path.display()))
                .ok()
        });
        Self {
            schema: schema.clone(),
            parquet,
            csv,
            csv_rows: 0,
            nulled_batches: 0,
        }
    }

    /// Append an aligned batch to every open output.
    ///
    /// The CSV mirror gets the values as read. In Parquet, columns of a
    /// non-conforming batch that failed their cast are written as nulls.
    /// An output that fails a write is dropped and its file removed.
    pub fn write(&mut self, aligned: &Aligned) {
        let batch = &aligned.batch;
        if batch.num_rows() == 0 {
            return;
        }

        if let Some(sink) = self.parquet.as_mut() {
            if !aligned.conforms {
                self.nulled_batches += 1;
                log::warn!(
                    "{} rows written to Parquet with column(s) {:?} nulled",
                    batch.num_rows(),
                    aligned.cast_failures
                );
            }
            let result = aligned
                .conforming(&self.schema)
                .map_err(io::Error::other)
                .and_then(|b| sink.write_batch(&b));
            if let Err(e) = result {
                log::warn!("Parquet output dropped after write error: {e}");
                if let Some(sink) = self.parquet.take() {
                    sink.abort();
                }
            }
        }

        if let Some(csv) = self.csv.as_mut() {
            match csv.write(batch) {
                Ok(()) => self.csv_rows += batch.num_rows(),
                Err(e) => {
                    log::warn!("CSV output dropped after write error: {e}");
                    if let Some(mirror) = self.csv.take() {
                        mirror.discard();
                    }
                }
            }
        }
    }

    /// Batches whose mismatched columns were nulled in Parquet
    pub fn nulled_batches(&self) -> usize {
        self.nulled_batches
    }

    /// Close every output
    pub fn finish(self) -> MergeOutputs {
        let mut outputs = MergeOutputs::default();
        if let Some(sink) = self.parquet {
            let path = sink.final_path().to_path_buf();
            match sink.finalize() {
                Ok(rows) => {
                    outputs.parquet = Some(path);
                    outputs.parquet_rows = rows;
                }
                Err(e) => log::warn!("Could not finalize {}: {e}", path.display()),
            }
        }
        if let Some(mirror) = self.csv {
            let path = mirror.path.clone();
            match mirror.finish() {
                Ok(path) => {
                    outputs.csv = Some(path);
                    outputs.csv_rows = self.csv_rows;
                }
                Err(e) => log::warn!("Could not finish {}: {e}", path.display()),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, Int64Array, ListArray, StringArray};
    use arrow::datatypes::{DataType, Field, Int32Type, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    use crate::align::align_batch;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("doi", DataType::Utf8, true),
            Field::new("n", DataType::Int64, true),
        ]))
    }

    fn aligned(rows: i64) -> Aligned {
        let dois: Vec<String> = (0..rows).map(|i| format!("10.1/{i}")).collect();
        let batch = RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(StringArray::from(dois)),
                Arc::new(Int64Array::from((0..rows).collect::<Vec<_>>())),
            ],
        )
        .unwrap();
        align_batch(&batch, &schema()).unwrap()
    }

    /// `n` holds text that cannot become Int64
    fn mismatched(rows: usize) -> Aligned {
        let source = Arc::new(Schema::new(vec![
            Field::new("doi", DataType::Utf8, true),
            Field::new("n", DataType::Utf8, true),
        ]));
        let dois: Vec<String> = (0..rows).map(|i| format!("10.2/{i}")).collect();
        let batch = RecordBatch::try_new(
            source,
            vec![
                Arc::new(StringArray::from(dois)),
                Arc::new(StringArray::from(vec!["many"; rows])),
            ],
        )
        .unwrap();
        let aligned = align_batch(&batch, &schema()).unwrap();
        assert!(!aligned.conforms);
        aligned
    }

    fn parquet_rows(path: &Path) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
            .unwrap()
            .build()
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn writes_parquet_and_chunked_csv() {
        let dir = TempDir::new().unwrap();
        let pq = dir.path().join("out.parquet");
        let csv = dir.path().join("out.csv");
        let mut writer = MergeWriter::open(Some(&pq), Some(&csv), &schema(), 3, 4);

        writer.write(&aligned(10));
        writer.write(&aligned(3));

        let out = writer.finish();
        assert_eq!(out.parquet.as_deref(), Some(pq.as_path()));
        assert_eq!(out.csv.as_deref(), Some(csv.as_path()));
        assert_eq!((out.parquet_rows, out.csv_rows), (13, 13));
        let text = std::fs::read_to_string(&csv).unwrap();
        // One header, 13 data lines
        assert_eq!(text.lines().count(), 14);
        assert_eq!(text.lines().next(), Some("doi,n"));
    }

    #[test]
    fn mismatched_batch_keeps_its_rows_in_parquet() {
        let dir = TempDir::new().unwrap();
        let pq = dir.path().join("out.parquet");
        let csv = dir.path().join("out.csv");
        let mut writer = MergeWriter::open(Some(&pq), Some(&csv), &schema(), 3, 100);

        writer.write(&aligned(2));
        writer.write(&mismatched(3));
        assert_eq!(writer.nulled_batches(), 1);

        let out = writer.finish();
        assert_eq!(out.rows_written(), 5);
        let batches = parquet_rows(&pq);
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 5);
        let last = batches.last().unwrap();
        let doi = last.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(doi.value(last.num_rows() - 1), "10.2/2");
        assert!(last.column(1).is_null(last.num_rows() - 1));
        // CSV keeps the original text
        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.contains("10.2/0,many"));
    }

    #[test]
    fn failed_csv_write_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let pq = dir.path().join("out.parquet");
        let csv = dir.path().join("out.csv");
        let item = Arc::new(Field::new("item", DataType::Int32, true));
        let nested = Arc::new(Schema::new(vec![
            Field::new("doi", DataType::Utf8, true),
            Field::new("refs", DataType::List(item), true),
        ]));
        let batch = RecordBatch::try_new(
            nested.clone(),
            vec![
                Arc::new(StringArray::from(vec!["10.1/a"])),
                Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![
                    Some(1),
                ])])),
            ],
        )
        .unwrap();
        let mut writer = MergeWriter::open(Some(&pq), Some(&csv), &nested, 3, 100);

        // Nested columns have no CSV form
        writer.write(&align_batch(&batch, &nested).unwrap());

        let out = writer.finish();
        assert!(out.csv.is_none());
        assert!(!csv.exists());
        assert_eq!(out.parquet.as_deref(), Some(pq.as_path()));
        assert_eq!(out.rows_written(), 1);
    }

    #[test]
    fn unopenable_output_is_skipped() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("missing").join("out.parquet");
        let csv = dir.path().join("out.csv");
        let mut writer = MergeWriter::open(Some(&bad), Some(&csv), &schema(), 3, 100);
        writer.write(&aligned(2));

        let out = writer.finish();
        assert!(out.parquet.is_none());
        assert!(out.csv.is_some());
        assert_eq!(out.rows_written(), 2);
    }

    #[test]
    fn nothing_requested() {
        let mut writer = MergeWriter::open(None, None, &schema(), 3, 100);
        writer.write(&aligned(5));
        assert_eq!(writer.finish(), MergeOutputs::default());
    }
}
