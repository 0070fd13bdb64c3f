//! Hardened cursor walk over `/works`.
//!
//! [`PageStream`] is a pull iterator: each `next()` either hands out a
//! buffered record or fetches the next page (with retry). Termination does
//! not trust the cursor alone: the walk also stops at the advertised total,
//! on a missing cursor, on a repeating cursor and after too many empty hops.

use std::collections::VecDeque;

use indicatif::ProgressBar;
use prepline_core::{RetryPolicy, StreamError, retry_with_backoff};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::api::{PageQuery, WorksApi};

/// A cursor may come back once more before the walk gives up on it
const MAX_CURSOR_REPEATS: u32 = 1;

/// Consecutive empty pages followed before giving up
const MAX_EMPTY_HOPS: u32 = 16;

/// Cursors remembered per stream
const SEEN_CURSOR_CAPACITY: usize = 256;

/// Bounded memory of recently seen cursors with repeat counts
#[derive(Debug, Default)]
struct SeenCursors {
    counts: FxHashMap<String, u32>,
    order: VecDeque<String>,
}

impl SeenCursors {
    /// Record `cursor`; returns how often it had been seen before
    fn observe(&mut self, cursor: &str) -> u32 {
        if let Some(n) = self.counts.get_mut(cursor) {
            *n += 1;
            return *n - 1;
        }
        if self.order.len() == SEEN_CURSOR_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.counts.remove(&old);
            }
        }
        self.counts.insert(cursor.to_string(), 1);
        self.order.push_back(cursor.to_string());
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Next call fetches a page
    Fetching,
    /// Buffered items remain from the current page
    Advancing,
    Done,
}

/// Pull iterator over every record a filtered query returns
pub struct PageStream<'a, A: ?Sized> {
    api: &'a A,
    query: PageQuery,
    policy: RetryPolicy,
    state: State,
    buffer: VecDeque<Value>,
    seen: SeenCursors,
    total: Option<u64>,
    emitted: u64,
    empty_hops: u32,
    pages: u32,
    /// Set when the page just buffered is the last one
    last_page: bool,
    progress: Option<ProgressBar>,
}

impl<'a, A: WorksApi + ?Sized> PageStream<'a, A> {
    pub fn new(api: &'a A, query: PageQuery, policy: RetryPolicy) -> Self {
        Self {
            api,
            query,
            policy,
            state: State::Fetching,
            buffer: VecDeque::new(),
            seen: SeenCursors::default(),
            total: None,
            emitted: 0,
            empty_hops: 0,
            pages: 0,
            last_page: false,
            progress: None,
        }
    }

    /// Attach a bar whose length is set from the advertised total
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// `total-results` from the first page, once fetched
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    fn finish(&mut self) {
        self.state = State::Done;
        self.buffer.clear();
        if let Some(pb) = self.progress.take() {
            pb.finish_and_clear();
        }
    }

    /// Fetch one page and decide what comes after it
    fn fetch(&mut self) -> Result<(), StreamError> {
        let api = self.api;
        let query = &self.query;
        let page = retry_with_backoff("page fetch", &self.policy, || api.fetch_page(query))?;
        self.pages += 1;

        if self.total.is_none() {
            self.total = page.total_results;
            if let (Some(pb), Some(n)) = (&self.progress, page.total_results) {
                pb.set_length(n);
            }
        }

        if page.items.is_empty() {
            // Hop over an empty page only to a cursor not seen before
            match page.next_cursor {
                Some(cur)
                    if self.empty_hops < MAX_EMPTY_HOPS && self.seen.observe(&cur) == 0 =>
                {
                    self.empty_hops += 1;
                    self.query.cursor = cur;
                }
                _ => self.state = State::Done,
            }
            return Ok(());
        }

        self.empty_hops = 0;
        let incoming = page.items.len() as u64;
        self.buffer.extend(page.items);
        self.state = State::Advancing;

        let reached_total = self
            .total
            .is_some_and(|t| t > 0 && self.emitted + incoming >= t);
        self.last_page = match page.next_cursor {
            _ if reached_total => true,
            None => true,
            Some(cur) => {
                let repeats = self.seen.observe(&cur);
                self.query.cursor = cur;
                repeats > MAX_CURSOR_REPEATS
            }
        };
        Ok(())
    }
}

impl<A: WorksApi + ?Sized> Iterator for PageStream<'_, A> {
    type Item = Result<Value, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                State::Done => return None,
                State::Advancing => match self.buffer.pop_front() {
                    Some(item) => {
                        self.emitted += 1;
                        if let Some(pb) = &self.progress {
                            pb.inc(1);
                        }
                        return Some(Ok(item));
                    }
                    None if self.last_page => self.finish(),
                    None => self.state = State::Fetching,
                },
                State::Fetching => {
                    if let Err(e) = self.fetch() {
                        self.finish();
                        return Some(Err(e));
                    }
                    if self.state == State::Done {
                        self.finish();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use chrono::NaiveDate;
    use serde_json::json;

    use crate::api::{Page, Selector};
    use crate::config::SortKey;
    use crate::filter::Filter;
    use crate::window::TimeWindow;

    /// Serves pages from a script and records the cursors requested
    struct Pages {
        pages: RefCell<VecDeque<Result<Page, StreamError>>>,
        cursors: RefCell<Vec<String>>,
        calls: Cell<usize>,
    }

    impl Pages {
        fn new(pages: Vec<Result<Page, StreamError>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                cursors: RefCell::new(Vec::new()),
                calls: Cell::new(0),
            }
        }
    }

    impl WorksApi for Pages {
        fn fetch_page(&self, query: &PageQuery) -> Result<Page, StreamError> {
            self.calls.set(self.calls.get() + 1);
            self.cursors.borrow_mut().push(query.cursor.clone());
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(StreamError::Malformed("no more pages".into())))
        }

        fn fetch_work(&self, _doi: &str) -> Result<Option<Value>, StreamError> {
            Ok(None)
        }
    }

    fn page(total: u64, next: Option<&str>, dois: &[&str]) -> Result<Page, StreamError> {
        Ok(Page {
            total_results: Some(total),
            next_cursor: next.map(String::from),
            items: dois.iter().map(|d| json!({ "DOI": d })).collect(),
        })
    }

    fn query() -> PageQuery {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let filter = Filter::for_window(&TimeWindow::for_dates(d, d), None);
        PageQuery::first(filter, 2, SortKey::Deposited, Selector::Full)
    }

    fn dois(items: Vec<Result<Value, StreamError>>) -> Vec<String> {
        items
            .into_iter()
            .map(|r| r.unwrap()["DOI"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn stops_at_advertised_total() {
        // The API keeps handing out cursors; the stream must not ask again
        let api = Pages::new(vec![
            page(3, Some("c1"), &["a", "b"]),
            page(3, Some("c2"), &["c"]),
            page(3, Some("c3"), &["never"]),
        ]);
        let mut stream = PageStream::new(&api, query(), RetryPolicy::immediate(1));
        let items: Vec<_> = stream.by_ref().collect();
        assert_eq!(dois(items), vec!["a", "b", "c"]);
        assert_eq!(stream.total(), Some(3));
        assert_eq!(stream.emitted(), 3);
        assert_eq!(stream.pages(), 2);
        assert_eq!(api.calls.get(), 2);
        assert_eq!(*api.cursors.borrow(), vec!["*", "c1"]);
    }

    #[test]
    fn stops_without_next_cursor() {
        let api = Pages::new(vec![page(10, Some("c1"), &["a", "b"]), page(10, None, &["c"])]);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(1)).collect();
        assert_eq!(dois(items), vec!["a", "b", "c"]);
        assert_eq!(api.calls.get(), 2);
    }

    #[test]
    fn repeating_cursor_terminates() {
        // Same cursor forever with total never reached
        let pages = (0..10).map(|_| page(1_000, Some("loop"), &["x"])).collect();
        let api = Pages::new(pages);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(1)).collect();
        // First sighting, one allowed repeat, then the second repeat ends it
        assert_eq!(items.len(), 3);
        assert_eq!(api.calls.get(), 3);
    }

    #[test]
    fn empty_page_hops_to_fresh_cursor() {
        let api = Pages::new(vec![
            page(2, Some("c1"), &[]),
            page(2, Some("c2"), &["a", "b"]),
        ]);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(1)).collect();
        assert_eq!(dois(items), vec!["a", "b"]);
        assert_eq!(*api.cursors.borrow(), vec!["*", "c1"]);
    }

    #[test]
    fn empty_page_with_seen_cursor_ends() {
        let api = Pages::new(vec![
            page(9, Some("c1"), &["a"]),
            page(9, Some("c1"), &[]),
            page(9, Some("c2"), &["never"]),
        ]);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(1)).collect();
        assert_eq!(dois(items), vec!["a"]);
        assert_eq!(api.calls.get(), 2);
    }

    #[test]
    fn empty_first_page_ends() {
        let api = Pages::new(vec![page(0, None, &[])]);
        let mut stream = PageStream::new(&api, query(), RetryPolicy::immediate(1));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert_eq!(api.calls.get(), 1);
    }

    #[test]
    fn fatal_error_yielded_once() {
        let api = Pages::new(vec![
            page(10, Some("c1"), &["a"]),
            Err(StreamError::Http {
                status: Some(400),
                message: "bad filter".into(),
            }),
        ]);
        let mut stream = PageStream::new(&api, query(), RetryPolicy::immediate(3));
        assert!(stream.next().unwrap().is_ok());
        let err = stream.next().unwrap().unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(stream.next().is_none());
        assert_eq!(api.calls.get(), 2);
    }

    #[test]
    fn transient_page_error_retried() {
        let api = Pages::new(vec![
            Err(StreamError::Http {
                status: Some(502),
                message: "gateway".into(),
            }),
            page(1, None, &["a"]),
        ]);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(3)).collect();
        assert_eq!(dois(items), vec!["a"]);
        assert_eq!(api.calls.get(), 2);
    }

    #[test]
    fn zero_total_does_not_stop_early() {
        // total-results 0 is treated as "unknown", the cursor decides
        let api = Pages::new(vec![page(0, Some("c1"), &["a"]), page(0, None, &["b"])]);
        let items: Vec<_> = PageStream::new(&api, query(), RetryPolicy::immediate(1)).collect();
        assert_eq!(dois(items), vec!["a", "b"]);
    }

    #[test]
    fn seen_cursors_bounded() {
        let mut seen = SeenCursors::default();
        for i in 0..(SEEN_CURSOR_CAPACITY + 10) {
            assert_eq!(seen.observe(&format!("c{i}")), 0);
        }
        assert_eq!(seen.counts.len(), SEEN_CURSOR_CAPACITY);
        // Oldest entries evicted
        assert_eq!(seen.observe("c0"), 0);
        let last = format!("c{}", SEEN_CURSOR_CAPACITY + 9);
        assert_eq!(seen.observe(&last), 1);
    }
}
