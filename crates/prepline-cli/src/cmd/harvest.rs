//! Harvest subcommand - fetch Crossref posted content into Parquet shards

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use prepline_core::{ProgressContext, RetryPolicy, fmt_num};
use prepline_crossref::{CrossrefClient, HarvestConfig, RehydrateConfig, RunSummary, SortKey};
use prepline_merge::{MergeConfig, Traversal};

use super::merge::print_merge_summary;
use super::{path_or_skipped, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// First posted date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, default_value = "2015-01-01")]
    pub from: NaiveDate,

    /// Last posted date (YYYY-MM-DD, default: today)
    #[arg(long, value_parser = parse_date)]
    pub until: Option<NaiveDate>,

    /// Contact e-mail sent with every request (or PREPLINE_MAILTO)
    #[arg(long)]
    pub mailto: Option<String>,

    /// DOI prefixes, each harvested separately (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub prefix: Vec<String>,

    /// Days per batch; each batch becomes one shard
    #[arg(long)]
    pub batch_days: Option<u32>,

    /// Rows per API call (max 1000)
    #[arg(long)]
    pub rows: Option<u32>,

    /// Cursor sort field: deposited, created or indexed
    #[arg(long)]
    pub sort: Option<SortKey>,

    /// Split windows whose count exceeds this
    #[arg(long)]
    pub adaptive_threshold: Option<u64>,

    /// Never split windows shorter than this
    #[arg(long)]
    pub min_window_seconds: Option<i64>,

    /// Disable DOI-first fetching of dense windows
    #[arg(long)]
    pub no_rehydrate: bool,

    /// Windows above this count are fetched DOI by DOI
    #[arg(long)]
    pub rehydrate_threshold: Option<u64>,

    /// Milliseconds between single-DOI lookups
    #[arg(long)]
    pub rehydrate_delay_ms: Option<u64>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,

    /// Merge the run's shards into one Parquet file afterwards
    #[arg(long)]
    pub save_parquet: bool,

    /// Merge the run's shards into one CSV file afterwards
    #[arg(long)]
    pub save_csv: bool,

    /// Stream every row to a gzipped NDJSON file
    #[arg(long)]
    pub save_ndjson: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Merge CLI flags over config file values
fn harvest_config(args: &HarvestArgs, config: &Config, retry: RetryPolicy) -> Result<HarvestConfig> {
    let file = &config.harvest;
    let mailto = args
        .mailto
        .clone()
        .or_else(|| config.crossref.mailto.clone())
        .context("A contact e-mail is required: pass --mailto, set crossref.mailto or PREPLINE_MAILTO")?;
    let sort_key = match args.sort {
        Some(key) => key,
        None => file
            .sort_key
            .parse()
            .map_err(|e: String| anyhow::anyhow!("harvest.sort_key: {e}"))?,
    };
    let prefixes = if args.prefix.is_empty() {
        config.crossref.prefixes.clone()
    } else {
        args.prefix.clone()
    };

    let defaults = HarvestConfig::default();
    Ok(HarvestConfig {
        date_start: args.from,
        date_end: args.until.unwrap_or(defaults.date_end),
        mailto,
        prefixes,
        batch_days: args.batch_days.unwrap_or(file.batch_days),
        rows_per_call: args.rows.unwrap_or(file.rows_per_call),
        sort_key,
        adaptive_threshold: args.adaptive_threshold.unwrap_or(file.adaptive_threshold),
        min_window_seconds: args.min_window_seconds.unwrap_or(file.min_window_seconds),
        rehydrate: RehydrateConfig {
            enabled: file.rehydrate && !args.no_rehydrate,
            threshold: args.rehydrate_threshold.unwrap_or(file.rehydrate_threshold),
            delay: Duration::from_millis(args.rehydrate_delay_ms.unwrap_or(file.rehydrate_delay_ms)),
        },
        retry,
        output_dir: args
            .output
            .clone()
            .unwrap_or_else(|| config.output.default_dir.clone()),
        save_ndjson: args.save_ndjson,
        base_url: config.crossref.base_url.clone(),
        zstd_level: args.zstd_level.unwrap_or(config.output.compression_level),
        timeout: Duration::from_secs(config.http.timeout),
    })
}

pub fn run(
    args: HarvestArgs,
    config: &Config,
    retry: RetryPolicy,
    progress: &ProgressContext,
) -> Result<()> {
    let harvest = harvest_config(&args, config, retry)?;

    log::info!("Harvesting Crossref posted content");
    log::info!("  Range: {} → {}", harvest.date_start, harvest.date_end);
    log::info!("  Prefixes: {:?}", harvest.prefixes);
    log::info!("  Output: {}", harvest.output_dir.display());

    let api = CrossrefClient::new(&harvest.base_url, &harvest.mailto, harvest.timeout)
        .context("Cannot build HTTP client")?;
    let summary = prepline_crossref::run(&harvest, &api, progress)?;
    print_harvest_summary(&summary);

    let has_shards = summary.shards_written + summary.batches_skipped > 0;
    if (args.save_parquet || args.save_csv) && has_shards {
        consolidate(&harvest, &summary, &args, config)?;
    } else if args.save_parquet || args.save_csv {
        log::warn!("No shards to consolidate");
    }
    Ok(())
}

/// Merge this run's shard directory into the final wide outputs
fn consolidate(
    harvest: &HarvestConfig,
    summary: &RunSummary,
    args: &HarvestArgs,
    config: &Config,
) -> Result<()> {
    let merge_config = MergeConfig {
        inputs: vec![summary.shard_dir.clone()],
        output_dir: harvest.output_dir.clone(),
        basename: "crossref_preprints_wide".to_string(),
        traversal: Traversal::Flat,
        truncation_cap: Some(config.merge.truncation_cap),
        write_parquet: args.save_parquet,
        write_csv: args.save_csv,
        zstd_level: harvest.zstd_level,
        ..Default::default()
    };
    log::info!("Consolidating shards from {}", summary.shard_dir.display());
    let merged = prepline_merge::run(&merge_config).context("Final consolidation failed")?;
    print_merge_summary("Consolidated", &merged);
    Ok(())
}

fn print_harvest_summary(summary: &RunSummary) {
    print_summary(
        "Crossref",
        &[
            (
                "Batches",
                format!(
                    "{} ({} already on disk)",
                    summary.batches, summary.batches_skipped
                ),
            ),
            (
                "Sub-windows",
                format!(
                    "{} ({} splits, {} DOI-first)",
                    summary.subwindows, summary.splits, summary.rehydrated_windows
                ),
            ),
            (
                "Rows",
                format!(
                    "{} in {} new shard(s)",
                    fmt_num(summary.rows_written as u64),
                    summary.shards_written
                ),
            ),
            (
                "Skipped",
                format!(
                    "{} records without DOI, {} failed lookups, {} cut-short windows",
                    summary.skipped_items, summary.rehydrate_failures, summary.malformed_windows
                ),
            ),
            ("Shards", summary.shard_dir.display().to_string()),
            ("NDJSON", path_or_skipped(summary.ndjson_path.as_deref())),
            ("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())),
        ],
    );
}
