//! Harvest orchestration: batches → sub-windows → records → shards

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDate;
use prepline_core::{NdjsonSink, ProgressContext, cleanup_tmp_files, fmt_num};
use serde_json::Value;

use crate::api::{PageQuery, Selector, WorksApi};
use crate::config::HarvestConfig;
use crate::filter::Filter;
use crate::probe::ApiProbe;
use crate::rehydrate::rehydrate;
use crate::row::FlatRow;
use crate::schema;
use crate::shard::ShardWriter;
use crate::stream::PageStream;
use crate::transform::work_to_row;
use crate::window::{Leaf, Partitioner, TimeWindow};

/// Run a harvest over `config`'s date range against `api`.
///
/// Each batch window ends in its own shard under [`HarvestConfig::shard_dir`];
/// batches whose shard already exists are skipped, so an interrupted run can
/// simply be restarted.
pub fn run<A: WorksApi + ?Sized>(
    config: &HarvestConfig,
    api: &A,
    progress: &ProgressContext,
) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    config.validate()?;

    let shard_dir = config.shard_dir();
    fs::create_dir_all(&shard_dir)
        .with_context(|| format!("Cannot create shard directory {}", shard_dir.display()))?;
    let removed = cleanup_tmp_files(&shard_dir)
        .with_context(|| format!("Cannot scan {}", shard_dir.display()))?;
    if removed > 0 {
        log::info!("Removed {removed} stale tmp file(s)");
    }
    log::info!("Shards will be written to: {}", shard_dir.display());

    let ndjson = if config.save_ndjson {
        open_ndjson(config)
    } else {
        None
    };

    let mut harvest = Harvest {
        config,
        api,
        progress,
        writer: ShardWriter::new(&shard_dir, schema::preprints().clone(), config.zstd_level),
        ndjson,
        summary: RunSummary::new(shard_dir),
    };

    let stage = progress.stage_line("harvest");
    let batches = config.batches();
    for (i, &(first, last)) in batches.iter().enumerate() {
        stage.set_message(format!("batch {}/{}: {first} → {last}", i + 1, batches.len()));
        harvest.batch(first, last)?;
    }
    stage.finish_and_clear();

    let Harvest {
        ndjson,
        mut summary,
        ..
    } = harvest;
    if let Some(sink) = ndjson {
        let path = sink.path().to_path_buf();
        match sink.finish() {
            Ok(n) => {
                log::info!("NDJSON written to: {} ({} rows)", path.display(), fmt_num(n as u64));
                summary.ndjson_path = Some(path);
            }
            Err(e) => log::warn!("Could not finish NDJSON {}: {e}", path.display()),
        }
    }

    summary.elapsed = start.elapsed();
    summary.log();
    Ok(summary)
}

fn open_ndjson(config: &HarvestConfig) -> Option<NdjsonSink> {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = config
        .output_dir
        .join(format!("crossref_preprints_wide_{ts}.ndjson.gz"));
    match NdjsonSink::open(&path) {
        Ok(sink) => Some(sink),
        Err(e) => {
            log::warn!("NDJSON output disabled, cannot open {}: {e}", path.display());
            None
        }
    }
}

/// State of one run
struct Harvest<'a, A: ?Sized> {
    config: &'a HarvestConfig,
    api: &'a A,
    progress: &'a ProgressContext,
    writer: ShardWriter,
    ndjson: Option<NdjsonSink>,
    summary: RunSummary,
}

impl<A: WorksApi + ?Sized> Harvest<'_, A> {
    fn batch(&mut self, first: NaiveDate, last: NaiveDate) -> anyhow::Result<()> {
        self.summary.batches += 1;
        if self.writer.is_committed(first, last) {
            log::info!("Batch {first} → {last} already harvested, skipping");
            self.summary.batches_skipped += 1;
            return Ok(());
        }
        log::info!("Window: {first} → {last}");

        let window = TimeWindow::for_dates(first, last);
        let mut rows = Vec::new();
        for prefix in self.config.prefix_fanout() {
            self.partition(window, prefix.as_deref(), &mut rows)?;
        }

        if rows.is_empty() {
            log::info!("No records for {first} → {last}");
            return Ok(());
        }
        let path = self
            .writer
            .write(first, last, &rows)
            .with_context(|| format!("Cannot write shard for {first} → {last}"))?;
        log::info!("Saved batch to: {} ({} rows)", path.display(), fmt_num(rows.len() as u64));
        self.summary.shards_written += 1;
        self.summary.rows_written += rows.len();
        Ok(())
    }

    fn partition(
        &mut self,
        window: TimeWindow,
        prefix: Option<&str>,
        rows: &mut Vec<FlatRow>,
    ) -> anyhow::Result<()> {
        let config = self.config;
        let probe = ApiProbe::new(self.api, prefix, config.sort_key, config.retry);
        let mut leaves = Partitioner::new(
            window,
            probe,
            config.adaptive_threshold,
            config.min_window_seconds,
        );
        for leaf in leaves.by_ref() {
            self.summary.subwindows += 1;
            self.subwindow(leaf, prefix, rows)?;
        }
        self.summary.splits += leaves.splits();
        self.summary.unknown_counts += leaves.into_probe().unknown;
        Ok(())
    }

    fn subwindow(&mut self, leaf: Leaf, prefix: Option<&str>, rows: &mut Vec<FlatRow>) -> anyhow::Result<()> {
        let config = self.config;
        let filter = Filter::for_window(&leaf.window, prefix);
        let pfx = prefix.unwrap_or("-");
        let before = rows.len();

        let dense = config.rehydrate.enabled
            && leaf
                .estimate
                .is_some_and(|n| n > config.rehydrate.threshold);

        if dense {
            log::info!(
                "[DOI-first] {} (prefix={pfx}) total={}",
                leaf.window,
                leaf.estimate.unwrap_or_default()
            );
            let stats = rehydrate(
                self.api,
                &filter,
                config.rows_per_call,
                config.sort_key,
                &config.retry,
                config.rehydrate.delay,
                |work| self.accept(work, rows),
            )
            .with_context(|| format!("DOI listing failed for {} (prefix={pfx})", leaf.window))?;
            self.summary.rehydrated_windows += 1;
            self.summary.rehydrate_failures += stats.failed;
            if stats.listing_truncated {
                self.summary.malformed_windows += 1;
            }
            log::info!(
                "Processed {} DOIs for window {} (prefix={pfx})",
                rows.len() - before,
                leaf.window
            );
            return Ok(());
        }

        let query = PageQuery::first(filter, config.rows_per_call, config.sort_key, Selector::Full);
        let bar = self
            .progress
            .records_bar(&leaf.window.start_iso(), leaf.estimate);
        let mut stream = PageStream::new(self.api, query, config.retry).with_progress(bar);
        for item in stream.by_ref() {
            match item {
                Ok(work) => self.accept(work, rows),
                Err(e) if e.is_malformed() => {
                    log::warn!(
                        "Skipping rest of {} (prefix={pfx}) after unreadable page: {e}",
                        leaf.window
                    );
                    self.summary.malformed_windows += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Streaming {} (prefix={pfx}) failed", leaf.window)));
                }
            }
        }
        log::info!(
            "Processed {} items (fast-path) for window {} (prefix={pfx})",
            rows.len() - before,
            leaf.window
        );
        log::debug!(
            "{} records over {} page(s) for {}",
            stream.emitted(),
            stream.pages(),
            leaf.window
        );
        Ok(())
    }

    /// Transform one record into `rows`, mirroring it to NDJSON when enabled
    fn accept(&mut self, work: Value, rows: &mut Vec<FlatRow>) {
        let Some(row) = work_to_row(&work) else {
            log::debug!("Dropping record without DOI");
            self.summary.skipped_items += 1;
            return;
        };
        if let Some(sink) = self.ndjson.as_mut() {
            if let Err(e) = sink.write_row(&row) {
                log::warn!("NDJSON output disabled after write error: {e}");
                self.ndjson = None;
            }
        }
        rows.push(row);
    }
}

/// Summary of a harvest run
#[derive(Debug)]
pub struct RunSummary {
    pub shard_dir: PathBuf,
    /// Batch windows visited
    pub batches: usize,
    /// Batches skipped because their shard already existed
    pub batches_skipped: usize,
    pub subwindows: usize,
    pub splits: usize,
    pub rehydrated_windows: usize,
    /// Sub-windows whose count probe failed
    pub unknown_counts: usize,
    /// Windows cut short by an unreadable page
    pub malformed_windows: usize,
    /// Records dropped for lacking a DOI
    pub skipped_items: usize,
    pub rehydrate_failures: usize,
    pub shards_written: usize,
    pub rows_written: usize,
    pub ndjson_path: Option<PathBuf>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(shard_dir: PathBuf) -> Self {
        Self {
            shard_dir,
            batches: 0,
            batches_skipped: 0,
            subwindows: 0,
            splits: 0,
            rehydrated_windows: 0,
            unknown_counts: 0,
            malformed_windows: 0,
            skipped_items: 0,
            rehydrate_failures: 0,
            shards_written: 0,
            rows_written: 0,
            ndjson_path: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn log(&self) {
        log::info!("=== Harvest Summary ===");
        log::info!(
            "Batches: {} ({} already on disk), sub-windows: {} ({} splits, {} DOI-first)",
            self.batches,
            self.batches_skipped,
            self.subwindows,
            self.splits,
            self.rehydrated_windows
        );
        log::info!(
            "Rows: {} in {} new shard(s)",
            fmt_num(self.rows_written as u64),
            self.shards_written
        );
        if self.unknown_counts + self.malformed_windows + self.skipped_items + self.rehydrate_failures > 0 {
            log::warn!(
                "Skipped: {} unknown counts, {} cut-short windows, {} records without DOI, {} failed lookups",
                self.unknown_counts,
                self.malformed_windows,
                self.skipped_items,
                self.rehydrate_failures
            );
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_starts_empty() {
        let summary = RunSummary::new(PathBuf::from("out"));
        assert_eq!(summary.rows_written, 0);
        assert_eq!(summary.shards_written, 0);
        assert!(summary.ndjson_path.is_none());
    }

    #[test]
    fn summary_log_does_not_panic() {
        let mut summary = RunSummary::new(PathBuf::from("out"));
        summary.rows_written = 1_000;
        summary.unknown_counts = 2;
        summary.elapsed = Duration::from_secs(3);
        summary.log();
    }
}
