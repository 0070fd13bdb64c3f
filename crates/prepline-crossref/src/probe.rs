//! Zero-row cardinality probe

use prepline_core::{RetryPolicy, retry_with_backoff};

use crate::api::{PageQuery, Selector, WorksApi};
use crate::config::SortKey;
use crate::filter::Filter;
use crate::window::{CountProbe, TimeWindow};

/// Advertised `total-results` for `filter`.
///
/// Asks for zero rows first and falls back to a one-row request. A response
/// without a total counts as zero. `None` only when both requests fail.
pub fn probe_total<A: WorksApi + ?Sized>(
    api: &A,
    filter: &Filter,
    sort: SortKey,
    policy: &RetryPolicy,
) -> Option<u64> {
    let mut last_err = None;
    for rows in [0, 1] {
        let query = PageQuery::first(filter.clone(), rows, sort, Selector::Full);
        match retry_with_backoff("count probe", policy, || api.fetch_page(&query)) {
            Ok(page) => return Some(page.total_results.unwrap_or(0)),
            Err(e) => {
                log::debug!("Count probe with rows={rows} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    if let Some(e) = last_err {
        log::warn!("Count probe failed for [{filter}]: {e}");
    }
    None
}

/// [`CountProbe`] over the live API for one optional DOI prefix
pub struct ApiProbe<'a, A: ?Sized> {
    pub api: &'a A,
    pub prefix: Option<&'a str>,
    pub sort: SortKey,
    pub policy: RetryPolicy,
    /// Windows whose count could not be determined
    pub unknown: usize,
}

impl<'a, A: WorksApi + ?Sized> ApiProbe<'a, A> {
    pub fn new(api: &'a A, prefix: Option<&'a str>, sort: SortKey, policy: RetryPolicy) -> Self {
        Self {
            api,
            prefix,
            sort,
            policy,
            unknown: 0,
        }
    }
}

impl<A: WorksApi + ?Sized> CountProbe for ApiProbe<'_, A> {
    fn count(&mut self, window: &TimeWindow) -> Option<u64> {
        let filter = Filter::for_window(window, self.prefix);
        let total = probe_total(self.api, &filter, self.sort, &self.policy);
        if total.is_none() {
            self.unknown += 1;
        }
        total
    }
}
