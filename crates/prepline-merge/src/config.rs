//! Merge run configuration

use std::path::PathBuf;

/// How far below each input directory shards are searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Only the input directory itself
    Flat,
    /// The input directory and its immediate subdirectories
    #[default]
    OneLevelDeep,
    /// Every directory below the input
    Recursive,
}

impl std::str::FromStr for Traversal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "one-level-deep" => Ok(Self::OneLevelDeep),
            "recursive" => Ok(Self::Recursive),
            other => Err(format!(
                "unknown traversal '{other}' (expected flat, one-level-deep or recursive)"
            )),
        }
    }
}

impl std::fmt::Display for Traversal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flat => "flat",
            Self::OneLevelDeep => "one-level-deep",
            Self::Recursive => "recursive",
        })
    }
}

/// Runtime configuration for a merge
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Parent directories searched for `*.parquet` shards
    pub inputs: Vec<PathBuf>,
    /// Where merged files and reports are written
    pub output_dir: PathBuf,
    /// Prefix of every output file name
    pub basename: String,
    /// Keep only shards whose file name contains this
    pub name_contains: Option<String>,
    pub traversal: Traversal,
    /// Row count flagging a shard as possibly truncated; `None` disables
    pub truncation_cap: Option<u64>,
    pub write_parquet: bool,
    pub write_csv: bool,
    /// Zstd compression level for the merged Parquet file
    pub zstd_level: i32,
    /// Rows per CSV write
    pub csv_chunk_rows: usize,
    /// Column rows are deduplicated on
    pub dedup_key: String,
    /// Earliest value across these columns (in order, nulls last) wins
    pub sort_columns: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_dir: PathBuf::from("./data/output"),
            basename: "crossref_preprints_merged".to_string(),
            name_contains: None,
            traversal: Traversal::default(),
            truncation_cap: Some(2000),
            write_parquet: true,
            write_csv: true,
            zstd_level: 3,
            csv_chunk_rows: 250_000,
            dedup_key: "doi".to_string(),
            sort_columns: ["posted_date", "deposited_date", "indexed_date", "created_date"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl MergeConfig {
    /// Cap with `Some(0)` normalized to disabled
    pub fn effective_cap(&self) -> Option<u64> {
        self.truncation_cap.filter(|c| *c > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MergeConfig::default();
        assert_eq!(config.basename, "crossref_preprints_merged");
        assert_eq!(config.traversal, Traversal::OneLevelDeep);
        assert_eq!(config.truncation_cap, Some(2000));
        assert_eq!(config.csv_chunk_rows, 250_000);
        assert_eq!(config.dedup_key, "doi");
        assert_eq!(config.sort_columns[0], "posted_date");
    }

    #[test]
    fn zero_cap_disables() {
        let config = MergeConfig {
            truncation_cap: Some(0),
            ..Default::default()
        };
        assert_eq!(config.effective_cap(), None);
    }

    #[test]
    fn traversal_roundtrip() {
        for t in [Traversal::Flat, Traversal::OneLevelDeep, Traversal::Recursive] {
            assert_eq!(t.to_string().parse::<Traversal>().unwrap(), t);
        }
        assert!("deep".parse::<Traversal>().is_err());
    }
}
