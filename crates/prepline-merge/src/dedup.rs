//! First pass of a merge: pick one surviving row per key

use std::cmp::Ordering;
use std::path::Path;

use arrow::array::{Array, AsArray, BooleanArray, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use rustc_hash::FxHashMap;

use crate::schema::{open_reader, read_schema};

/// Where the current survivor of a key lives
struct Winner {
    order: Vec<Option<String>>,
    shard: usize,
    row: usize,
}

/// Per-shard keep flags computed over every readable shard
#[derive(Debug, Default)]
pub struct DedupPlan {
    /// `None`: shard lacks the key column, keep every row
    keep: Vec<Option<Vec<bool>>>,
    pub duplicates: u64,
    /// Shards that failed to read (by input position); excluded from the merge
    pub failed: Vec<usize>,
}

/// Lexicographic comparison with nulls after every value
fn compare_nulls_last(a: &[Option<String>], b: &[Option<String>]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x, y) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn utf8_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>, ArrowError> {
    match batch.column_by_name(name) {
        Some(col) => Ok(Some(cast(col, &DataType::Utf8)?.as_string::<i32>().clone())),
        None => Ok(None),
    }
}

type KeyedRow = (Option<String>, Vec<Option<String>>);

/// Key and ordering values of every row of one shard
fn read_keys(
    path: &Path,
    key: &str,
    sort_columns: &[String],
    batch_size: usize,
) -> anyhow::Result<Vec<KeyedRow>> {
    let mut wanted = vec![key];
    wanted.extend(sort_columns.iter().map(String::as_str));
    let reader = open_reader(path, Some(wanted.as_slice()), batch_size)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let keys = utf8_column(&batch, key)?;
        let orders = sort_columns
            .iter()
            .map(|c| utf8_column(&batch, c))
            .collect::<Result<Vec<_>, _>>()?;
        for r in 0..batch.num_rows() {
            let k = keys
                .as_ref()
                .filter(|a| a.is_valid(r))
                .map(|a| a.value(r).to_string());
            let order = orders
                .iter()
                .map(|a| a.as_ref().filter(|a| a.is_valid(r)).map(|a| a.value(r).to_string()))
                .collect();
            rows.push((k, order));
        }
    }
    Ok(rows)
}

impl DedupPlan {
    /// Scan `shards` in order, keeping for each key the row whose ordering
    /// values compare lowest. Ties keep the row seen first; rows with a null
    /// key are always kept.
    pub fn build<P: AsRef<Path>>(
        shards: &[P],
        key: &str,
        sort_columns: &[String],
        batch_size: usize,
    ) -> Self {
        let mut plan = Self::default();
        let mut winners: FxHashMap<String, Winner> = FxHashMap::default();

        for (shard, path) in shards.iter().enumerate() {
            let path = path.as_ref();
            let has_key = match read_schema(path) {
                Ok(schema) => schema.index_of(key).is_ok(),
                Err(e) => {
                    log::warn!("Skipping {}: {e}", path.display());
                    plan.failed.push(shard);
                    plan.keep.push(None);
                    continue;
                }
            };
            if !has_key {
                log::warn!("{} has no '{key}' column, keeping all its rows", path.display());
                plan.keep.push(None);
                continue;
            }

            let rows = match read_keys(path, key, sort_columns, batch_size) {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Skipping {}: {e:#}", path.display());
                    plan.failed.push(shard);
                    plan.keep.push(None);
                    continue;
                }
            };

            plan.keep.push(Some(Vec::with_capacity(rows.len())));
            for (row, (k, order)) in rows.into_iter().enumerate() {
                let Some(k) = k else {
                    plan.push_flag(shard, true);
                    continue;
                };
                match winners.get_mut(&k) {
                    None => {
                        winners.insert(k, Winner { order, shard, row });
                        plan.push_flag(shard, true);
                    }
                    Some(w) => {
                        plan.duplicates += 1;
                        if compare_nulls_last(&order, &w.order) == Ordering::Less {
                            plan.clear_flag(w.shard, w.row);
                            *w = Winner { order, shard, row };
                            plan.push_flag(shard, true);
                        } else {
                            plan.push_flag(shard, false);
                        }
                    }
                }
            }
        }

        log::debug!("{} unique keys, {} duplicates", winners.len(), plan.duplicates);
        plan
    }

    /// Plan that keeps every row of `shards` shards
    pub fn keep_all(shards: usize) -> Self {
        Self {
            keep: vec![None; shards],
            ..Default::default()
        }
    }

    fn push_flag(&mut self, shard: usize, keep: bool) {
        if let Some(Some(flags)) = self.keep.get_mut(shard) {
            flags.push(keep);
        }
    }

    fn clear_flag(&mut self, shard: usize, row: usize) {
        if let Some(Some(flags)) = self.keep.get_mut(shard) {
            if let Some(flag) = flags.get_mut(row) {
                *flag = false;
            }
        }
    }

    pub fn is_failed(&self, shard: usize) -> bool {
        self.failed.contains(&shard)
    }

    /// Filter mask for rows `offset..offset + len` of `shard`; `None` keeps all
    pub fn mask(&self, shard: usize, offset: usize, len: usize) -> Option<BooleanArray> {
        let flags = self.keep.get(shard)?.as_ref()?.get(offset..offset + len)?;
        if flags.iter().all(|k| *k) {
            None
        } else {
            Some(BooleanArray::from(flags.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::sync::Arc;

    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use tempfile::TempDir;

    fn sort_columns() -> Vec<String> {
        vec!["posted_date".to_string(), "created_date".to_string()]
    }

    fn write(path: &Path, rows: &[(Option<&str>, Option<&str>)]) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("doi", DataType::Utf8, true),
            Field::new("posted_date", DataType::Utf8, true),
        ]));
        let dois: Vec<_> = rows.iter().map(|r| r.0).collect();
        let dates: Vec<_> = rows.iter().map(|r| r.1).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(dois)), Arc::new(StringArray::from(dates))],
        )
        .unwrap();
        let mut w = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
        w.write(&batch).unwrap();
        w.close().unwrap();
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn nulls_sort_last() {
        assert_eq!(compare_nulls_last(&[s("2024-01-01")], &[None]), Ordering::Less);
        assert_eq!(compare_nulls_last(&[None, s("a")], &[None, s("b")]), Ordering::Less);
        assert_eq!(compare_nulls_last(&[None], &[None]), Ordering::Equal);
    }

    #[test]
    fn earliest_row_survives_across_shards() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write(&a, &[(Some("10.1/x"), Some("2024-03-01")), (Some("10.1/y"), Some("2024-01-01"))]);
        write(&b, &[(Some("10.1/x"), Some("2024-02-01")), (Some("10.1/y"), None), (None, None)]);

        let plan = DedupPlan::build(&[a.as_path(), b.as_path()], "doi", &sort_columns(), 1024);

        assert_eq!(plan.duplicates, 2);
        assert!(plan.failed.is_empty());
        // x: later shard wins with the earlier date; y: dated row beats null
        assert_eq!(plan.mask(0, 0, 2), Some(BooleanArray::from(vec![false, true])));
        assert_eq!(plan.mask(1, 0, 3), Some(BooleanArray::from(vec![true, false, true])));
    }

    #[test]
    fn ties_keep_first_seen() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        write(&a, &[(Some("10.1/x"), Some("2024-01-01")), (Some("10.1/x"), Some("2024-01-01"))]);

        let plan = DedupPlan::build(&[a.as_path()], "doi", &sort_columns(), 1);
        assert_eq!(plan.mask(0, 0, 2), Some(BooleanArray::from(vec![true, false])));
        assert_eq!(plan.mask(0, 0, 1), None);
    }

    #[test]
    fn unreadable_shard_fails_alone() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.parquet");
        let bad = dir.path().join("bad.parquet");
        write(&a, &[(Some("10.1/x"), None)]);
        std::fs::write(&bad, b"garbage").unwrap();

        let plan = DedupPlan::build(&[bad.as_path(), a.as_path()], "doi", &sort_columns(), 1024);
        assert_eq!(plan.failed, [0]);
        assert!(plan.is_failed(0));
        assert_eq!(plan.mask(1, 0, 1), None);
    }

    #[test]
    fn keep_all_masks_nothing() {
        let plan = DedupPlan::keep_all(2);
        assert_eq!(plan.mask(1, 0, 10), None);
        assert_eq!(plan.duplicates, 0);
    }
}
