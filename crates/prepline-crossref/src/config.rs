//! Crossref harvest configuration

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use prepline_core::RetryPolicy;

/// Crossref caps `rows` per request at 1000
pub const MAX_ROWS_PER_CALL: u32 = 1000;

/// Sort field passed as `sort=`; always ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Deposited,
    Created,
    Indexed,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposited => "deposited",
            Self::Created => "created",
            Self::Indexed => "indexed",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposited" => Ok(Self::Deposited),
            "created" => Ok(Self::Created),
            "indexed" => Ok(Self::Indexed),
            other => Err(format!(
                "unknown sort key '{other}' (expected deposited, created or indexed)"
            )),
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DOI-first fallback for windows too dense to page through directly
#[derive(Debug, Clone)]
pub struct RehydrateConfig {
    pub enabled: bool,
    /// Probed totals strictly above this switch the window to DOI-first
    pub threshold: u64,
    /// Pause between single-record lookups
    pub delay: Duration,
}

impl Default for RehydrateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1800,
            delay: Duration::from_millis(50),
        }
    }
}

/// Runtime configuration for one harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// First posted date (inclusive)
    pub date_start: NaiveDate,
    /// Last posted date (inclusive)
    pub date_end: NaiveDate,
    /// Contact address for the polite pool
    pub mailto: String,
    /// Harvest each DOI prefix as its own filter; empty = no prefix filter
    pub prefixes: Vec<String>,
    /// Days per top-level batch (one shard per batch)
    pub batch_days: u32,
    pub rows_per_call: u32,
    pub sort_key: SortKey,
    /// Partitioner splits windows whose probed count exceeds this
    pub adaptive_threshold: u64,
    /// Windows this short are never split further
    pub min_window_seconds: i64,
    pub rehydrate: RehydrateConfig,
    pub retry: RetryPolicy,
    /// Root output directory; shards go into a per-range subdirectory
    pub output_dir: PathBuf,
    /// Also stream every row to a gzipped NDJSON file
    pub save_ndjson: bool,
    pub base_url: String,
    /// Zstd compression level for shard files
    pub zstd_level: i32,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            date_start: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            date_end: chrono::Local::now().date_naive(),
            mailto: String::new(),
            prefixes: Vec::new(),
            batch_days: 7,
            rows_per_call: MAX_ROWS_PER_CALL,
            sort_key: SortKey::default(),
            adaptive_threshold: 1500,
            min_window_seconds: 3600,
            rehydrate: RehydrateConfig::default(),
            retry: RetryPolicy::default(),
            output_dir: PathBuf::from("./data/output"),
            save_ndjson: false,
            base_url: "https://api.crossref.org".to_string(),
            zstd_level: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

impl HarvestConfig {
    /// Reject settings the API or the partitioner cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.date_start <= self.date_end,
            "date_start {} is after date_end {}",
            self.date_start,
            self.date_end
        );
        anyhow::ensure!(self.batch_days >= 1, "batch_days must be at least 1");
        anyhow::ensure!(
            (1..=MAX_ROWS_PER_CALL).contains(&self.rows_per_call),
            "rows_per_call must be between 1 and {MAX_ROWS_PER_CALL}, got {}",
            self.rows_per_call
        );
        anyhow::ensure!(
            self.min_window_seconds >= 1,
            "min_window_seconds must be positive"
        );
        anyhow::ensure!(
            !self.mailto.trim().is_empty(),
            "a contact address (mailto) is required"
        );
        Ok(())
    }

    /// Directory holding this run's shard files
    pub fn shard_dir(&self) -> PathBuf {
        self.output_dir.join(format!(
            "crossref_batches_{}_to_{}",
            self.date_start.format("%Y%m%d"),
            self.date_end.format("%Y%m%d")
        ))
    }

    /// One entry per harvested prefix; `[None]` when no prefixes are set
    pub fn prefix_fanout(&self) -> Vec<Option<String>> {
        let cleaned: Vec<Option<String>> = self
            .prefixes
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Some(p.to_string()))
            .collect();
        if cleaned.is_empty() {
            vec![None]
        } else {
            cleaned
        }
    }

    /// Top-level batch windows `[start, end]` in date order
    pub fn batches(&self) -> Vec<(NaiveDate, NaiveDate)> {
        let step = chrono::Days::new(u64::from(self.batch_days.max(1)));
        let mut out = Vec::new();
        let mut cur = self.date_start;
        while cur <= self.date_end {
            let end = cur
                .checked_add_days(step)
                .and_then(|d| d.pred_opt())
                .map_or(self.date_end, |d| d.min(self.date_end));
            out.push((cur, end));
            match end.succ_opt() {
                Some(next) => cur = next,
                None => break,
            }
        }
        out
    }
}
