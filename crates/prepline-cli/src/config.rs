//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for prepline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub crossref: CrossrefConfig,
    pub http: HttpConfig,
    pub harvest: HarvestSection,
    pub merge: MergeSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
    pub compression_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./data/output"),
            compression_level: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrossrefConfig {
    pub base_url: String,
    /// Contact for the polite pool; `${VAR}` is expanded
    #[serde(deserialize_with = "deserialize_env_var")]
    pub mailto: Option<String>,
    pub prefixes: Vec<String>,
}

impl Default for CrossrefConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.crossref.org".to_string(),
            mailto: std::env::var("PREPLINE_MAILTO").ok(),
            prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    pub timeout: u64,
    pub max_retries: u32,
    /// First retry delay in milliseconds; doubles per attempt
    pub retry_base_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            max_retries: 6,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestSection {
    pub batch_days: u32,
    pub rows_per_call: u32,
    pub sort_key: String,
    pub adaptive_threshold: u64,
    pub min_window_seconds: i64,
    pub rehydrate: bool,
    pub rehydrate_threshold: u64,
    pub rehydrate_delay_ms: u64,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            batch_days: 7,
            rows_per_call: 1000,
            sort_key: "deposited".to_string(),
            adaptive_threshold: 1500,
            min_window_seconds: 3600,
            rehydrate: true,
            rehydrate_threshold: 1800,
            rehydrate_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeSection {
    pub basename: String,
    /// Row count flagging a shard as truncated; 0 disables
    pub truncation_cap: u64,
    pub traversal: String,
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            basename: "crossref_preprints_merged".to_string(),
            truncation_cap: 2000,
            traversal: "one-level-deep".to_string(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./prepline.toml (current directory)
    /// 2. ~/.config/prepline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("prepline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "prepline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if config.crossref.mailto.is_none() {
            config.crossref.mailto = std::env::var("PREPLINE_MAILTO").ok();
        }

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
