//! prepline - Crossref preprint harvester and shard merger
//!
//! Harvests Crossref posted content into dated Parquet shards and
//! consolidates shards into one deduplicated dataset.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use prepline_core::{ProgressContext, RetryPolicy, Verbosity};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "prepline")]
#[command(about = "Crossref preprint harvester and shard merger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./prepline.toml or ~/.config/prepline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Maximum attempts for transient HTTP failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Whole-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest Crossref posted content into Parquet shards
    Harvest(cmd::harvest::HarvestArgs),
    /// Merge Parquet shards into one dataset
    Merge(cmd::merge::MergeArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = ProgressContext::new();
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    prepline_core::init_logging(Verbosity::from_flags(cli.quiet, cli.debug), multi)?;

    let mut config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    if let Some(timeout) = cli.timeout {
        config.http.timeout = timeout;
    }
    let retry = RetryPolicy {
        max_attempts: cli.max_retries.unwrap_or(config.http.max_retries).max(1),
        base_delay: Duration::from_millis(config.http.retry_base_ms),
    };

    match cli.command {
        Command::Harvest(args) => cmd::harvest::run(args, &config, retry, &progress),
        Command::Merge(args) => cmd::merge::run(args, &config),
        Command::Config => {
            let mailto = config.crossref.mailto.as_deref().unwrap_or("not set");
            let prefixes = if config.crossref.prefixes.is_empty() {
                "(all)".to_string()
            } else {
                config.crossref.prefixes.join(", ")
            };
            cmd::print_summary(
                "Setting",
                &[
                    ("Output directory", config.output.default_dir.display().to_string()),
                    ("Compression level", config.output.compression_level.to_string()),
                    ("Crossref base URL", config.crossref.base_url.clone()),
                    ("Contact (mailto)", mailto.to_string()),
                    ("DOI prefixes", prefixes),
                    ("Batch days", config.harvest.batch_days.to_string()),
                    ("Rows per call", config.harvest.rows_per_call.to_string()),
                    ("Sort key", config.harvest.sort_key.clone()),
                    (
                        "Adaptive split",
                        format!(
                            "> {} records, min {}s",
                            config.harvest.adaptive_threshold, config.harvest.min_window_seconds
                        ),
                    ),
                    (
                        "DOI-first",
                        if config.harvest.rehydrate {
                            format!(
                                "> {} records, {}ms delay",
                                config.harvest.rehydrate_threshold, config.harvest.rehydrate_delay_ms
                            )
                        } else {
                            "disabled".to_string()
                        },
                    ),
                    ("Truncation cap", config.merge.truncation_cap.to_string()),
                    ("Timeout", format!("{}s", config.http.timeout)),
                    (
                        "Retries",
                        format!("{} attempts, {}ms base delay", retry.max_attempts, config.http.retry_base_ms),
                    ),
                ],
            );
            Ok(())
        }
    }
}
