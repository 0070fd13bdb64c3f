//! Crossref REST API client
//!
//! [`WorksApi`] is the seam between the harvest logic and the network: the
//! runner, prober, stream reader and rehydrator only see this trait, so tests
//! drive them with an in-memory catalog.

use std::time::Duration;

use prepline_core::{StreamError, client_builder, get_text};
use serde_json::Value;

use crate::config::SortKey;
use crate::filter::Filter;

/// Which fields a page request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Whole work records
    Full,
    /// `select=DOI`: identifiers only
    DoiOnly,
}

/// One `/works` page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub filter: Filter,
    pub rows: u32,
    pub cursor: String,
    pub sort: SortKey,
    pub selector: Selector,
}

impl PageQuery {
    /// First page of a cursor walk
    pub fn first(filter: Filter, rows: u32, sort: SortKey, selector: Selector) -> Self {
        Self {
            filter,
            rows,
            cursor: "*".to_string(),
            sort,
            selector,
        }
    }

    fn params(&self, mailto: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("filter", self.filter.to_param()),
            ("rows", self.rows.to_string()),
            ("cursor", self.cursor.clone()),
            ("mailto", mailto.to_string()),
            ("sort", self.sort.as_str().to_string()),
            ("order", "asc".to_string()),
        ];
        if self.selector == Selector::DoiOnly {
            params.push(("select", "DOI".to_string()));
        }
        params
    }
}

/// Decoded `message` of a `/works` list response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub total_results: Option<u64>,
    pub next_cursor: Option<String>,
    pub items: Vec<Value>,
}

impl Page {
    /// Parse a list response body
    pub fn from_json(body: &str) -> Result<Self, StreamError> {
        let root: Value = serde_json::from_str(body)
            .map_err(|e| StreamError::Malformed(format!("invalid JSON: {e}")))?;
        let message = root
            .get("message")
            .and_then(Value::as_object)
            .ok_or_else(|| StreamError::Malformed("missing 'message' object".to_string()))?;

        let items = match message.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(StreamError::Malformed("'items' is not an array".to_string())),
        };

        Ok(Self {
            total_results: message.get("total-results").and_then(Value::as_u64),
            next_cursor: message
                .get("next-cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(String::from),
            items,
        })
    }
}

/// Everything the harvester needs from the catalog
pub trait WorksApi {
    /// One page of a filtered cursor walk
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, StreamError>;

    /// A single work by DOI; `Ok(None)` when the response carries no record
    fn fetch_work(&self, doi: &str) -> Result<Option<Value>, StreamError>;
}

/// Blocking reqwest-backed client for `api.crossref.org`
#[derive(Debug, Clone)]
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
}

impl CrossrefClient {
    /// Build a client identifying itself with `mailto` for the polite pool
    pub fn new(base_url: &str, mailto: &str, timeout: Duration) -> Result<Self, StreamError> {
        let user_agent = format!(
            "prepline/{} (mailto:{mailto})",
            env!("CARGO_PKG_VERSION")
        );
        let client = client_builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| StreamError::from_reqwest(&e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mailto: mailto.to_string(),
        })
    }

    fn works_url(&self) -> String {
        format!("{}/works", self.base_url)
    }

    /// `/works/{doi}` with the DOI percent-encoded as one path segment
    fn work_url(&self, doi: &str) -> Result<reqwest::Url, StreamError> {
        let mut url = reqwest::Url::parse(&self.works_url())
            .map_err(|e| StreamError::Malformed(format!("bad base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| StreamError::Malformed("base URL cannot take a path".to_string()))?
            .push(doi);
        Ok(url)
    }
}

impl WorksApi for CrossrefClient {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, StreamError> {
        let body = get_text(&self.client, &self.works_url(), &query.params(&self.mailto))?;
        Page::from_json(&body)
    }

    fn fetch_work(&self, doi: &str) -> Result<Option<Value>, StreamError> {
        let url = self.work_url(doi)?;
        let body = get_text(&self.client, url.as_str(), &[("mailto", self.mailto.clone())])?;
        let mut root: Value = serde_json::from_str(&body)
            .map_err(|e| StreamError::Malformed(format!("invalid JSON for {doi}: {e}")))?;
        Ok(match root.get_mut("message").map(Value::take) {
            Some(Value::Object(m)) if !m.is_empty() => Some(Value::Object(m)),
            _ => None,
        })
    }
}
