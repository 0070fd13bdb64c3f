//! Prepline Core - shared plumbing for the harvester and the merger
//!
//! Blocking HTTP with retry, atomic Parquet/NDJSON sinks, logging and
//! progress reporting.

pub mod error;
pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod sink;

pub use error::StreamError;
pub use http::{SHARED_RUNTIME, client_builder, get_text};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use progress::{ProgressContext, fmt_num, human_size};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use sink::{NdjsonSink, ParquetSink, cleanup_tmp_files, is_valid_parquet, tmp_path_for};
