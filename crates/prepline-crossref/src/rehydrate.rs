//! DOI-first fallback for dense windows.
//!
//! Deep cursor walks over a single filter get truncated by the API. For a
//! window advertising more results than the rehydration threshold the
//! harvester lists identifiers only (`select=DOI`, much lighter pages) and
//! then fetches every work individually.

use std::time::Duration;

use prepline_core::{RetryPolicy, StreamError, retry_with_backoff};
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::api::{PageQuery, Selector, WorksApi};
use crate::config::SortKey;
use crate::filter::Filter;
use crate::stream::PageStream;

/// Outcome of one rehydrated window
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RehydrateStats {
    /// Distinct DOIs the listing produced
    pub listed: usize,
    /// Advertised total of the listing
    pub advertised: Option<u64>,
    /// Records fetched and handed to the sink
    pub fetched: usize,
    /// Lookups that failed or returned nothing
    pub failed: usize,
    /// Listing ended on an unreadable page
    pub listing_truncated: bool,
}

/// Collect the distinct DOIs matching `filter`, in listing order.
///
/// A malformed page ends the listing early and keeps what was gathered;
/// any other error is returned.
pub fn list_dois<A: WorksApi + ?Sized>(
    api: &A,
    filter: &Filter,
    rows: u32,
    sort: SortKey,
    policy: &RetryPolicy,
) -> Result<(Vec<String>, Option<u64>, bool), StreamError> {
    let query = PageQuery::first(filter.clone(), rows, sort, Selector::DoiOnly);
    let mut stream = PageStream::new(api, query, *policy);
    let mut seen = FxHashSet::default();
    let mut dois = Vec::new();
    let mut truncated = false;

    for item in stream.by_ref() {
        match item {
            Ok(v) => {
                if let Some(doi) = v.get("DOI").and_then(Value::as_str) {
                    if seen.insert(doi.to_string()) {
                        dois.push(doi.to_string());
                    }
                }
            }
            Err(e) if e.is_malformed() => {
                log::warn!("DOI listing cut short after {} ids: {e}", dois.len());
                truncated = true;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((dois, stream.total(), truncated))
}

/// List DOIs for `filter`, then fetch each work and pass it to `sink`.
///
/// Per-DOI failures are logged and counted, never fatal. `delay` is slept
/// between lookups.
pub fn rehydrate<A, F>(
    api: &A,
    filter: &Filter,
    rows: u32,
    sort: SortKey,
    policy: &RetryPolicy,
    delay: Duration,
    mut sink: F,
) -> Result<RehydrateStats, StreamError>
where
    A: WorksApi + ?Sized,
    F: FnMut(Value),
{
    let (dois, advertised, listing_truncated) = list_dois(api, filter, rows, sort, policy)?;
    let mut stats = RehydrateStats {
        listed: dois.len(),
        advertised,
        listing_truncated,
        ..Default::default()
    };

    if let Some(total) = advertised {
        if (dois.len() as u64) < total {
            log::warn!(
                "DOI listing returned {} of {total} advertised ids for [{filter}]",
                dois.len()
            );
        }
    }

    for (i, doi) in dois.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match retry_with_backoff("work lookup", policy, || api.fetch_work(doi)) {
            Ok(Some(work)) => {
                sink(work);
                stats.fetched += 1;
            }
            Ok(None) => {
                log::warn!("No record returned for DOI {doi}");
                stats.failed += 1;
            }
            Err(e) => {
                log::warn!("Fetch failed for DOI {doi}: {e}");
                stats.failed += 1;
            }
        }
    }

    log::info!(
        "Rehydrated {}/{} DOIs for [{filter}]",
        stats.fetched,
        stats.listed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use chrono::NaiveDate;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    use crate::api::Page;
    use crate::window::TimeWindow;

    struct Catalog {
        listing: RefCell<VecDeque<Result<Page, StreamError>>>,
        works: FxHashMap<String, Result<Value, u16>>,
        lookups: RefCell<Vec<String>>,
        selectors: RefCell<Vec<Selector>>,
    }

    impl WorksApi for Catalog {
        fn fetch_page(&self, query: &PageQuery) -> Result<Page, StreamError> {
            self.selectors.borrow_mut().push(query.selector);
            self.listing
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }

        fn fetch_work(&self, doi: &str) -> Result<Option<Value>, StreamError> {
            self.lookups.borrow_mut().push(doi.to_string());
            match self.works.get(doi) {
                Some(Ok(v)) => Ok(Some(v.clone())),
                Some(Err(status)) => Err(StreamError::Http {
                    status: Some(*status),
                    message: "lookup".into(),
                }),
                None => Ok(None),
            }
        }
    }

    fn listing(total: u64, next: Option<&str>, dois: &[&str]) -> Result<Page, StreamError> {
        Ok(Page {
            total_results: Some(total),
            next_cursor: next.map(String::from),
            items: dois.iter().map(|d| json!({ "DOI": d })).collect(),
        })
    }

    fn filter() -> Filter {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Filter::for_window(&TimeWindow::for_dates(d, d), Some("10.1101"))
    }

    fn catalog(listing: Vec<Result<Page, StreamError>>, works: &[(&str, Result<Value, u16>)]) -> Catalog {
        Catalog {
            listing: RefCell::new(listing.into()),
            works: works
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            lookups: RefCell::new(Vec::new()),
            selectors: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn lists_then_fetches_each() {
        let api = catalog(
            vec![listing(3, Some("c1"), &["10.1/a", "10.1/b"]), listing(3, None, &["10.1/c"])],
            &[
                ("10.1/a", Ok(json!({"DOI": "10.1/a"}))),
                ("10.1/b", Ok(json!({"DOI": "10.1/b"}))),
                ("10.1/c", Ok(json!({"DOI": "10.1/c"}))),
            ],
        );
        let mut got = Vec::new();
        let stats = rehydrate(
            &api,
            &filter(),
            1000,
            SortKey::Deposited,
            &RetryPolicy::immediate(2),
            Duration::ZERO,
            |v| got.push(v["DOI"].as_str().unwrap().to_string()),
        )
        .unwrap();

        assert_eq!(got, vec!["10.1/a", "10.1/b", "10.1/c"]);
        assert_eq!(stats.listed, 3);
        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.failed, 0);
        assert!(api.selectors.borrow().iter().all(|s| *s == Selector::DoiOnly));
    }

    #[test]
    fn per_doi_failures_are_skipped() {
        let api = catalog(
            vec![listing(3, None, &["10.1/a", "10.1/gone", "10.1/err"])],
            &[("10.1/a", Ok(json!({"DOI": "10.1/a"}))), ("10.1/err", Err(404))],
        );
        let mut n = 0;
        let stats = rehydrate(
            &api,
            &filter(),
            1000,
            SortKey::Deposited,
            &RetryPolicy::immediate(2),
            Duration::ZERO,
            |_| n += 1,
        )
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.failed, 2);
        // 404 is final: one lookup each
        assert_eq!(api.lookups.borrow().len(), 3);
    }

    #[test]
    fn duplicate_dois_fetched_once() {
        let api = catalog(
            vec![listing(3, None, &["10.1/a", "10.1/a", "10.1/b"])],
            &[("10.1/a", Ok(json!({}))), ("10.1/b", Ok(json!({})))],
        );
        let (dois, total, truncated) =
            list_dois(&api, &filter(), 1000, SortKey::Deposited, &RetryPolicy::immediate(1)).unwrap();
        assert_eq!(dois, vec!["10.1/a", "10.1/b"]);
        assert_eq!(total, Some(3));
        assert!(!truncated);
    }

    #[test]
    fn malformed_listing_keeps_partial() {
        let api = catalog(
            vec![
                listing(5, Some("c1"), &["10.1/a"]),
                Err(StreamError::Malformed("garbage".into())),
            ],
            &[("10.1/a", Ok(json!({"DOI": "10.1/a"})))],
        );
        let stats = rehydrate(
            &api,
            &filter(),
            1000,
            SortKey::Deposited,
            &RetryPolicy::immediate(1),
            Duration::ZERO,
            |_| {},
        )
        .unwrap();
        assert!(stats.listing_truncated);
        assert_eq!(stats.listed, 1);
        assert_eq!(stats.advertised, Some(5));
        assert_eq!(stats.fetched, 1);
    }

    #[test]
    fn fatal_listing_error_propagates() {
        let api = catalog(
            vec![Err(StreamError::Http {
                status: Some(400),
                message: "bad".into(),
            })],
            &[],
        );
        let result = rehydrate(
            &api,
            &filter(),
            1000,
            SortKey::Deposited,
            &RetryPolicy::immediate(1),
            Duration::ZERO,
            |_| {},
        );
        assert_eq!(result.unwrap_err().status(), Some(400));
        assert!(api.lookups.borrow().is_empty());
    }
}
