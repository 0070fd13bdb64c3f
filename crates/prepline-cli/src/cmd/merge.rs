//! Merge subcommand - consolidate Parquet shards into one dataset

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use prepline_core::fmt_num;
use prepline_merge::{MergeConfig, MergeSummary, Traversal};

use super::{path_or_skipped, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Directories to search for *.parquet shards
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Prefix of the output file names
    #[arg(short, long)]
    pub basename: Option<String>,

    /// Only merge shards whose file name contains this
    #[arg(long)]
    pub name_contains: Option<String>,

    /// flat, one-level-deep or recursive
    #[arg(short, long)]
    pub traversal: Option<Traversal>,

    /// Row count that flags a shard as possibly truncated (0 disables)
    #[arg(long)]
    pub truncation_cap: Option<u64>,

    /// Skip the merged Parquet file
    #[arg(long)]
    pub no_parquet: bool,

    /// Skip the CSV mirror
    #[arg(long)]
    pub no_csv: bool,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,
}

pub fn run(args: MergeArgs, config: &Config) -> Result<()> {
    let traversal = match args.traversal {
        Some(t) => t,
        None => config
            .merge
            .traversal
            .parse()
            .map_err(|e: String| anyhow::anyhow!("merge.traversal: {e}"))?,
    };
    let merge_config = MergeConfig {
        inputs: args.inputs,
        output_dir: args
            .output
            .unwrap_or_else(|| config.output.default_dir.clone()),
        basename: args
            .basename
            .unwrap_or_else(|| config.merge.basename.clone()),
        name_contains: args.name_contains,
        traversal,
        truncation_cap: Some(args.truncation_cap.unwrap_or(config.merge.truncation_cap)),
        write_parquet: !args.no_parquet,
        write_csv: !args.no_csv,
        zstd_level: args.zstd_level.unwrap_or(config.output.compression_level),
        ..Default::default()
    };

    log::info!("Merging shards");
    log::info!("  Inputs: {:?}", merge_config.inputs);
    log::info!("  Traversal: {}", merge_config.traversal);
    log::info!("  Output: {}", merge_config.output_dir.display());

    let summary = prepline_merge::run(&merge_config)?;
    print_merge_summary("Merge", &summary);
    Ok(())
}

pub fn print_merge_summary(title: &str, summary: &MergeSummary) {
    print_summary(
        title,
        &[
            (
                "Shards",
                format!(
                    "{} found, {} readable, {} possibly truncated",
                    summary.shards.len(),
                    summary.readable_shards(),
                    summary.suspected_incomplete
                ),
            ),
            (
                "Rows",
                format!(
                    "{} written ({} duplicates dropped)",
                    fmt_num(summary.rows_written),
                    fmt_num(summary.duplicates_dropped)
                ),
            ),
            ("Parquet", path_or_skipped(summary.parquet_path.as_deref())),
            ("CSV", path_or_skipped(summary.csv_path.as_deref())),
            ("Report", path_or_skipped(summary.report_md.as_deref())),
            ("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())),
        ],
    );
}
