//! Blocking HTTP on top of async reqwest.
//!
//! Requests run on a small shared tokio runtime via `block_on`, so callers
//! see a plain synchronous interface and issue one request at a time.

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::StreamError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a [`StreamError`] message
const ERROR_BODY_LIMIT: usize = 800;

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Client builder with the workspace defaults (connect timeout, pooling).
///
/// Callers add what is specific to them, e.g. a contact-bearing user agent
/// and a whole-request timeout.
pub fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(2)
}

/// GET `url` with `query` and return the body of a 2xx response.
///
/// Non-2xx responses become [`StreamError::Http`] carrying the status and
/// the (truncated) error body, so the caller's retry policy can decide.
pub fn get_text(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, StreamError> {
    SHARED_RUNTIME.handle().block_on(async {
        let resp = client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| StreamError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::Http {
                status: Some(status.as_u16()),
                message: truncate(&body, ERROR_BODY_LIMIT),
            });
        }
        resp.text().await.map_err(|e| StreamError::from_reqwest(&e))
    })
}

fn truncate(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
