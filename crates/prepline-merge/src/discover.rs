//! Shard discovery: find `*.parquet` files, count rows, infer date ranges

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use glob::Pattern;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::{FileReader, SerializedFileReader};
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::config::Traversal;

/// One discovered shard, as listed in the audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRecord {
    /// Directory the shard was found in
    pub folder: PathBuf,
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: Option<u64>,
    /// `None` when the file could not be read
    pub rows: Option<u64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// `rows == cap`; `None` when rows are unknown or no cap is set
    pub suspected_incomplete: Option<bool>,
    /// Schema readable; unreadable shards are audited but not merged
    pub readable: bool,
}

/// Dated file name patterns, tried in order
static DATE_RANGE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?P<start>\d{4}-\d{2}-\d{2}).{0,5}?(?P<end>\d{4}-\d{2}-\d{2})", "%Y-%m-%d"),
        (
            r"from[_\-]?(?P<start>\d{4}-\d{2}-\d{2}).{0,5}?until[_\-]?(?P<end>\d{4}-\d{2}-\d{2})",
            "%Y-%m-%d",
        ),
        (r"(?P<start>\d{8})\D{1,5}(?P<end>\d{8})", "%Y%m%d"),
    ]
    .into_iter()
    .filter_map(|(re, fmt)| match Regex::new(re) {
        Ok(re) => Some((re, fmt)),
        Err(e) => {
            log::error!("Invalid date pattern {re}: {e}");
            None
        }
    })
    .collect()
});

/// Start/end dates encoded in `name`, if any pattern matches
pub fn date_range_in(name: &str) -> Option<(NaiveDate, NaiveDate)> {
    DATE_RANGE_PATTERNS.iter().find_map(|(re, fmt)| {
        let caps = re.captures(name)?;
        let start = NaiveDate::parse_from_str(&caps["start"], fmt).ok()?;
        let end = NaiveDate::parse_from_str(&caps["end"], fmt).ok()?;
        Some((start, end))
    })
}

/// Row count from the Parquet footer, falling back to reading one column
pub fn count_rows(path: &Path) -> Option<u64> {
    let from_footer = File::open(path)
        .ok()
        .and_then(|f| SerializedFileReader::new(f).ok())
        .map(|r| r.metadata().file_metadata().num_rows());
    if let Some(n) = from_footer {
        return u64::try_from(n).ok();
    }

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).ok()?).ok()?;
    let mask = ProjectionMask::roots(builder.parquet_schema(), [0]);
    let reader = builder.with_projection(mask).build().ok()?;
    let mut rows = 0u64;
    for batch in reader {
        rows += batch.ok()?.num_rows() as u64;
    }
    Some(rows)
}

fn folders_for(parent: &Path, traversal: Traversal) -> Vec<PathBuf> {
    match traversal {
        Traversal::Flat | Traversal::Recursive => vec![parent.to_path_buf()],
        Traversal::OneLevelDeep => {
            let mut dirs: Vec<PathBuf> = match fs::read_dir(parent) {
                Ok(entries) => entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect(),
                Err(e) => {
                    log::warn!("Cannot list {}: {e}", parent.display());
                    Vec::new()
                }
            };
            dirs.sort();
            dirs.push(parent.to_path_buf());
            dirs
        }
    }
}

fn parquet_files(folder: &Path, recursive: bool) -> Vec<PathBuf> {
    let base = Pattern::escape(&folder.to_string_lossy());
    let pattern = if recursive {
        format!("{base}/**/*.parquet")
    } else {
        format!("{base}/*.parquet")
    };
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|p| match p {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("Skipping unreadable path: {e}");
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            log::warn!("Bad search pattern {pattern}: {e}");
            Vec::new()
        }
    }
}

/// Enumerate shards under `parents`, sorted by folder then file name.
///
/// Files reachable through several parents (or symlinks) are listed once.
pub fn discover(
    parents: &[PathBuf],
    traversal: Traversal,
    name_contains: Option<&str>,
    truncation_cap: Option<u64>,
) -> Vec<ShardRecord> {
    let mut seen = FxHashSet::default();
    let mut records = Vec::new();

    for parent in parents {
        if !parent.is_dir() {
            log::warn!("Missing input directory: {}", parent.display());
            continue;
        }
        for folder in folders_for(parent, traversal) {
            for path in parquet_files(&folder, traversal == Traversal::Recursive) {
                let resolved = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !seen.insert(resolved) {
                    continue;
                }
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if name_contains.is_some_and(|s| !filename.contains(s)) {
                    continue;
                }
                let shard_folder = path.parent().map_or_else(|| folder.clone(), Path::to_path_buf);
                records.push(inspect(shard_folder, path, filename, truncation_cap));
            }
        }
    }

    records.sort_by(|a, b| (&a.folder, &a.filename).cmp(&(&b.folder, &b.filename)));
    records
}

fn inspect(folder: PathBuf, path: PathBuf, filename: String, cap: Option<u64>) -> ShardRecord {
    let size_bytes = fs::metadata(&path).ok().map(|m| m.len());
    let rows = count_rows(&path);
    if rows.is_none() {
        log::warn!("Cannot read row count of {}", path.display());
    }
    let dates = date_range_in(&filename).or_else(|| {
        folder
            .file_name()
            .and_then(|n| date_range_in(&n.to_string_lossy()))
    });
    ShardRecord {
        suspected_incomplete: cap.and_then(|cap| rows.map(|r| r == cap)),
        readable: rows.is_some(),
        start_date: dates.map(|d| d.0),
        end_date: dates.map(|d| d.1),
        folder,
        path,
        filename,
        size_bytes,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn write_shard(path: &Path, rows: usize) {
        let schema = Arc::new(Schema::new(vec![Field::new("doi", DataType::Utf8, true)]));
        let dois: Vec<String> = (0..rows).map(|i| format!("10.1/{i}")).collect();
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(StringArray::from(dois))]).unwrap();
        let mut w = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
        w.write(&batch).unwrap();
        w.close().unwrap();
    }

    #[test]
    fn dashed_pair_in_name() {
        assert_eq!(
            date_range_in("crossref_preprints_2024-01-01_2024-01-07.parquet"),
            Some((date("2024-01-01"), date("2024-01-07")))
        );
    }

    #[test]
    fn from_until_pair() {
        assert_eq!(
            date_range_in("slice_from-2023-05-01_until-2023-05-31.parquet"),
            Some((date("2023-05-01"), date("2023-05-31")))
        );
    }

    #[test]
    fn compact_pair() {
        assert_eq!(
            date_range_in("crossref_batches_20150101_to_20151231"),
            Some((date("2015-01-01"), date("2015-12-31")))
        );
    }

    #[test]
    fn undated_and_invalid_names() {
        assert_eq!(date_range_in("merged.parquet"), None);
        assert_eq!(date_range_in("x_2024-13-01_2024-13-02.parquet"), None);
        // Too far apart
        assert_eq!(date_range_in("2024-01-01_and_then_2024-01-07"), None);
    }

    #[test]
    fn discovers_one_level_deep_and_dedups() {
        let dir = TempDir::new().unwrap();
        let run_a = dir.path().join("run_a");
        let deep = run_a.join("nested");
        fs::create_dir_all(&deep).unwrap();
        write_shard(&dir.path().join("top_2024-01-01_2024-01-07.parquet"), 3);
        write_shard(&run_a.join("a_2024-01-08_2024-01-14.parquet"), 2000);
        write_shard(&deep.join("too_deep.parquet"), 1);
        fs::write(run_a.join("notes.txt"), "ignored").unwrap();

        // Same parent twice: files listed once
        let parents = vec![dir.path().to_path_buf(), dir.path().to_path_buf()];
        let found = discover(&parents, Traversal::OneLevelDeep, None, Some(2000));

        assert_eq!(found.len(), 2);
        let a = found.iter().find(|r| r.filename.starts_with("a_")).unwrap();
        assert_eq!(a.rows, Some(2000));
        assert_eq!(a.suspected_incomplete, Some(true));
        assert_eq!(a.start_date, Some(date("2024-01-08")));
        assert!(a.readable);
        let top = found.iter().find(|r| r.filename.starts_with("top_")).unwrap();
        assert_eq!(top.suspected_incomplete, Some(false));
    }

    #[test]
    fn recursive_and_flat() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        write_shard(&dir.path().join("x.parquet"), 1);
        write_shard(&deep.join("y.parquet"), 1);

        let parents = vec![dir.path().to_path_buf()];
        assert_eq!(discover(&parents, Traversal::Recursive, None, None).len(), 2);
        assert_eq!(discover(&parents, Traversal::Flat, None, None).len(), 1);
    }

    #[test]
    fn name_filter_and_folder_dates() {
        let dir = TempDir::new().unwrap();
        let run = dir.path().join("crossref_batches_20240101_to_20240131");
        fs::create_dir_all(&run).unwrap();
        write_shard(&run.join("part_one.parquet"), 1);
        write_shard(&run.join("other.parquet"), 1);

        let found = discover(&[run.clone()], Traversal::Flat, Some("part"), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start_date, Some(date("2024-01-01")));
        assert_eq!(found[0].end_date, Some(date("2024-01-31")));
        assert_eq!(found[0].suspected_incomplete, None);
    }

    #[test]
    fn unreadable_shard_listed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.parquet"), b"not parquet at all").unwrap();
        let found = discover(&[dir.path().to_path_buf()], Traversal::Flat, None, Some(2000));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rows, None);
        assert!(!found[0].readable);
        assert_eq!(found[0].size_bytes, Some(18));
    }

    #[test]
    fn missing_parent_skipped() {
        let dir = TempDir::new().unwrap();
        let found = discover(&[dir.path().join("nope")], Traversal::OneLevelDeep, None, None);
        assert!(found.is_empty());
    }
}
