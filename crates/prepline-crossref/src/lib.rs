//! Prepline Crossref - adaptive harvester for Crossref posted content
//!
//! Splits a date range into windows small enough for the API to page through
//! completely, streams each window (or rehydrates it DOI by DOI when it is too
//! dense) and commits one Parquet shard per batch window.
//!
//! # Example
//!
//! ```no_run
//! use prepline_core::ProgressContext;
//! use prepline_crossref::{CrossrefClient, HarvestConfig, run};
//! use chrono::NaiveDate;
//!
//! let config = HarvestConfig {
//!     date_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     date_end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//!     mailto: "you@example.org".into(),
//!     ..Default::default()
//! };
//! let api = CrossrefClient::new(&config.base_url, &config.mailto, config.timeout).unwrap();
//! let summary = run(&config, &api, &ProgressContext::new()).expect("Harvest failed");
//! println!("Wrote {} rows", summary.rows_written);
//! ```

pub mod api;
pub mod config;
pub mod filter;
pub mod probe;
pub mod rehydrate;
pub mod row;
pub mod runner;
pub mod schema;
pub mod shard;
pub mod stream;
pub mod transform;
pub mod window;

// Re-exports for convenience
pub use api::{CrossrefClient, Page, PageQuery, Selector, WorksApi};
pub use config::{HarvestConfig, MAX_ROWS_PER_CALL, RehydrateConfig, SortKey};
pub use runner::{RunSummary, run};
pub use shard::shard_file_name;
pub use window::{Leaf, Partitioner, TimeWindow};
