//! Error type for catalog API requests

/// Error from a single API request (one page, one probe, or one record lookup).
///
/// Retry decisions are made on this type alone: see [`StreamError::is_retryable`].
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code (`None` = transport failure)
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Response arrived but could not be interpreted
    Malformed(String),
    /// Local I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            // Request URLs carry the contact address
            message: strip_url(e),
        }
    }

    /// Rate limiting (429), server-side failures (500/502/503/504) and
    /// transport errors are retried. Every other status is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(code), ..
            } => matches!(code, 429 | 500 | 502 | 503 | 504),
            Self::Malformed(_) => false,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }
}

fn strip_url(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(url) = e.url() {
        msg = msg.replace(url.as_str(), "<url>");
    }
    msg
}
