//! Audit outputs: a per-shard CSV and a Markdown summary

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, RecordBatch, StringArray, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use prepline_core::{fmt_num, human_size};

use crate::discover::ShardRecord;

/// Totals shown under the Markdown table
#[derive(Debug, Clone, Default)]
pub struct ReportTotals {
    /// Rows in the merged Parquet file, or in the CSV mirror without one
    pub rows_written: u64,
    pub duplicates_dropped: u64,
    pub nulled_batches: usize,
    pub parquet: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

fn date_text(d: Option<chrono::NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

/// One line per discovered shard, readable or not
pub fn write_audit_csv(path: &Path, shards: &[ShardRecord]) -> io::Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("folder", DataType::Utf8, false),
        Field::new("filepath", DataType::Utf8, false),
        Field::new("filename", DataType::Utf8, false),
        Field::new("filesize_bytes", DataType::UInt64, true),
        Field::new("rows", DataType::UInt64, true),
        Field::new("start_date_inferred", DataType::Utf8, true),
        Field::new("end_date_inferred", DataType::Utf8, true),
        Field::new("suspected_incomplete", DataType::Boolean, true),
        Field::new("readable", DataType::Boolean, false),
    ]));
    let text = |f: fn(&ShardRecord) -> String| -> ArrayRef {
        Arc::new(StringArray::from(shards.iter().map(f).collect::<Vec<_>>()))
    };
    let columns: Vec<ArrayRef> = vec![
        text(|s| s.folder.display().to_string()),
        text(|s| s.path.display().to_string()),
        text(|s| s.filename.clone()),
        Arc::new(UInt64Array::from(shards.iter().map(|s| s.size_bytes).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(shards.iter().map(|s| s.rows).collect::<Vec<_>>())),
        Arc::new(StringArray::from(
            shards.iter().map(|s| date_text(s.start_date)).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            shards.iter().map(|s| date_text(s.end_date)).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            shards.iter().map(|s| s.suspected_incomplete).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(shards.iter().map(|s| s.readable).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(schema, columns).map_err(io::Error::other)?;

    let mut writer = WriterBuilder::new().with_header(true).build(File::create(path)?);
    writer.write(&batch).map_err(io::Error::other)
}

/// Human-readable summary of the merge
pub fn render_markdown(shards: &[ShardRecord], totals: &ReportTotals) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Parquet merge report\n");
    let _ = writeln!(md, "| Folder | File | Size | Rows | Start | End | Flag |");
    let _ = writeln!(md, "|---|---|---:|---:|---|---|---|");
    for s in shards {
        let folder = s
            .folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| s.folder.display().to_string());
        let flag = if !s.readable {
            "unreadable"
        } else if s.suspected_incomplete == Some(true) {
            "possibly truncated"
        } else {
            ""
        };
        let _ = writeln!(
            md,
            "| {folder} | {} | {} | {} | {} | {} | {flag} |",
            s.filename,
            s.size_bytes.map(human_size).unwrap_or_default(),
            s.rows.map(fmt_num).unwrap_or_default(),
            date_text(s.start_date).unwrap_or_default(),
            date_text(s.end_date).unwrap_or_default(),
        );
    }

    let readable_rows: u64 = shards.iter().filter(|s| s.readable).filter_map(|s| s.rows).sum();
    let suspected = shards.iter().filter(|s| s.suspected_incomplete == Some(true)).count();
    let unreadable = shards.iter().filter(|s| !s.readable).count();
    let output = |p: &Option<PathBuf>| {
        p.as_ref()
            .map_or_else(|| "(skipped)".to_string(), |p| p.display().to_string())
    };

    let _ = writeln!(md, "\n## Summary\n");
    let _ = writeln!(md, "- Files found: {}", shards.len());
    let _ = writeln!(md, "- Unreadable files: {unreadable}");
    let _ = writeln!(md, "- Rows in readable files: {}", fmt_num(readable_rows));
    let _ = writeln!(md, "- Rows written: {}", fmt_num(totals.rows_written));
    let _ = writeln!(md, "- Duplicates dropped: {}", fmt_num(totals.duplicates_dropped));
    if totals.nulled_batches > 0 {
        let _ = writeln!(
            md,
            "- Batches with type-mismatched columns nulled in Parquet: {}",
            totals.nulled_batches
        );
    }
    let _ = writeln!(md, "- Suspected incomplete files: {suspected}");
    let _ = writeln!(md, "- Parquet: {}", output(&totals.parquet));
    let _ = writeln!(md, "- CSV: {}", output(&totals.csv));
    md
}

pub fn write_markdown(path: &Path, shards: &[ShardRecord], totals: &ReportTotals) -> io::Result<()> {
    fs::write(path, render_markdown(shards, totals))
}
