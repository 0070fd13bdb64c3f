//! Prepline Merge - consolidate harvested Parquet shards
//!
//! Discovers shards below one or more directories, unifies their schemas,
//! drops duplicate DOIs (earliest record wins) and writes one merged Parquet
//! file, an optional CSV mirror and an audit report.

pub mod align;
pub mod config;
pub mod dedup;
pub mod discover;
pub mod report;
pub mod schema;
pub mod writer;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use arrow::compute::filter_record_batch;
use prepline_core::fmt_num;

pub use config::{MergeConfig, Traversal};
pub use discover::{ShardRecord, discover};

use align::align_batch;
use dedup::DedupPlan;
use report::ReportTotals;
use schema::{open_reader, read_schema, unify};
use writer::MergeWriter;

/// Rows per batch read back from shards
const READ_BATCH_SIZE: usize = 8192;

/// Outcome of a merge
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub shards: Vec<ShardRecord>,
    /// Rows the readable shards declare
    pub shard_rows: u64,
    /// Rows in the merged Parquet file, or in the CSV mirror without one
    pub rows_written: u64,
    pub parquet_rows: u64,
    pub csv_rows: u64,
    pub duplicates_dropped: u64,
    pub suspected_incomplete: usize,
    /// Batches written to Parquet with mismatched columns nulled
    pub nulled_batches: usize,
    pub parquet_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub report_csv: Option<PathBuf>,
    pub report_md: Option<PathBuf>,
    pub elapsed: Duration,
}

impl MergeSummary {
    pub fn readable_shards(&self) -> usize {
        self.shards.iter().filter(|s| s.readable).count()
    }

    pub fn log(&self) {
        log::info!("=== Merge Summary ===");
        log::info!(
            "Shards: {} found, {} readable, {} possibly truncated",
            self.shards.len(),
            self.readable_shards(),
            self.suspected_incomplete
        );
        log::info!(
            "Rows: {} in shards, {} written, {} duplicates dropped",
            fmt_num(self.shard_rows),
            fmt_num(self.rows_written),
            fmt_num(self.duplicates_dropped)
        );
        if self.nulled_batches > 0 {
            log::warn!(
                "{} batch(es) have mismatched columns nulled in Parquet (values kept in CSV)",
                self.nulled_batches
            );
        }
        for (label, path) in [
            ("Parquet", &self.parquet_path),
            ("CSV", &self.csv_path),
            ("Audit", &self.report_csv),
            ("Report", &self.report_md),
        ] {
            match path {
                Some(p) => log::info!("{label}: {}", p.display()),
                None => log::info!("{label}: (skipped)"),
            }
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Output file names sharing one timestamp
struct OutputPaths {
    parquet: PathBuf,
    csv: PathBuf,
    report_csv: PathBuf,
    report_md: PathBuf,
}

impl OutputPaths {
    fn new(dir: &Path, basename: &str) -> Self {
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Self {
            parquet: dir.join(format!("{basename}_{ts}.parquet")),
            csv: dir.join(format!("{basename}_{ts}.csv")),
            report_csv: dir.join(format!("{basename}_REPORT_{ts}.csv")),
            report_md: dir.join(format!("{basename}_REPORT_{ts}.md")),
        }
    }
}

/// Merge every shard found under `config.inputs`.
///
/// Only an unusable output directory or an empty discovery fails the run;
/// shards that cannot be read are reported and left out.
pub fn run(config: &MergeConfig) -> anyhow::Result<MergeSummary> {
    let start = Instant::now();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Cannot create output directory {}", config.output_dir.display()))?;

    let mut shards = discover(
        &config.inputs,
        config.traversal,
        config.name_contains.as_deref(),
        config.effective_cap(),
    );
    if shards.is_empty() {
        bail!("No .parquet files found under {:?}", config.inputs);
    }
    log::info!("Found {} shard(s)", shards.len());

    let mut schemas = Vec::new();
    for shard in shards.iter_mut().filter(|s| s.readable) {
        match read_schema(&shard.path) {
            Ok(schema) => schemas.push(schema),
            Err(e) => {
                log::warn!("Skipping {}: {e}", shard.path.display());
                shard.readable = false;
            }
        }
    }
    let unified = unify(&schemas);
    log::debug!("Unified schema has {} column(s)", unified.fields().len());

    let readable: Vec<usize> = (0..shards.len()).filter(|&i| shards[i].readable).collect();
    let paths: Vec<PathBuf> = readable.iter().map(|&i| shards[i].path.clone()).collect();

    let plan = if unified.index_of(&config.dedup_key).is_ok() {
        DedupPlan::build(&paths, &config.dedup_key, &config.sort_columns, READ_BATCH_SIZE)
    } else {
        log::warn!("No '{}' column in any shard, duplicates are kept", config.dedup_key);
        DedupPlan::keep_all(paths.len())
    };
    for &failed in &plan.failed {
        shards[readable[failed]].readable = false;
    }

    let outputs = OutputPaths::new(&config.output_dir, &config.basename);
    let any_readable = !paths.is_empty();
    if !any_readable {
        log::warn!("No readable shards, only the report is written");
    }
    let mut writer = MergeWriter::open(
        (config.write_parquet && any_readable).then_some(outputs.parquet.as_path()),
        (config.write_csv && any_readable).then_some(outputs.csv.as_path()),
        &unified,
        config.zstd_level,
        config.csv_chunk_rows,
    );

    for (n, path) in paths.iter().enumerate() {
        if plan.is_failed(n) {
            continue;
        }
        if let Err(e) = copy_shard(path, n, &plan, &unified, &mut writer) {
            log::warn!("Stopped reading {} early: {e:#}", path.display());
        }
    }

    let nulled_batches = writer.nulled_batches();
    let outputs_written = writer.finish();
    let rows_written = outputs_written.rows_written() as u64;

    let mut summary = MergeSummary {
        shard_rows: shards.iter().filter(|s| s.readable).filter_map(|s| s.rows).sum(),
        suspected_incomplete: shards
            .iter()
            .filter(|s| s.suspected_incomplete == Some(true))
            .count(),
        rows_written,
        parquet_rows: outputs_written.parquet_rows as u64,
        csv_rows: outputs_written.csv_rows as u64,
        duplicates_dropped: plan.duplicates,
        nulled_batches,
        parquet_path: outputs_written.parquet,
        csv_path: outputs_written.csv,
        ..Default::default()
    };

    let totals = ReportTotals {
        rows_written,
        nulled_batches,
        duplicates_dropped: plan.duplicates,
        parquet: summary.parquet_path.clone(),
        csv: summary.csv_path.clone(),
    };
    match report::write_audit_csv(&outputs.report_csv, &shards) {
        Ok(()) => summary.report_csv = Some(outputs.report_csv),
        Err(e) => log::warn!("Could not write audit {}: {e}", outputs.report_csv.display()),
    }
    match report::write_markdown(&outputs.report_md, &shards, &totals) {
        Ok(()) => summary.report_md = Some(outputs.report_md),
        Err(e) => log::warn!("Could not write report {}: {e}", outputs.report_md.display()),
    }

    summary.shards = shards;
    summary.elapsed = start.elapsed();
    summary.log();
    Ok(summary)
}

/// Second pass over one shard: filter duplicates, align, write
fn copy_shard(
    path: &Path,
    shard: usize,
    plan: &DedupPlan,
    unified: &arrow::datatypes::SchemaRef,
    writer: &mut MergeWriter,
) -> anyhow::Result<()> {
    let reader = open_reader(path, None, READ_BATCH_SIZE)?;
    let mut offset = 0;
    for batch in reader {
        let batch = batch?;
        let len = batch.num_rows();
        let batch = match plan.mask(shard, offset, len) {
            Some(mask) => filter_record_batch(&batch, &mask)?,
            None => batch,
        };
        offset += len;
        writer.write(&align_batch(&batch, unified)?);
    }
    log::debug!("Merged {} ({} rows)", path.display(), fmt_num(offset as u64));
    Ok(())
}
