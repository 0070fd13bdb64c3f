//! Time windows and adaptive partitioning.
//!
//! Crossref truncates deep result sets, so a batch window is bisected until
//! every piece advertises at most `threshold` results (or gets too short to
//! split). The partitioner is a pull iterator over an explicit stack: no
//! recursion, leaves come out in chronological order.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Closed interval `[start, end]` at one-second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeWindow {
    /// `None` when `start > end`
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// From 00:00:00 on `first` through 23:59:59 on `last`
    pub fn for_dates(first: NaiveDate, last: NaiveDate) -> Self {
        let start = first.and_time(NaiveTime::MIN);
        let end = last.and_hms_opt(23, 59, 59).unwrap_or(start).max(start);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Seconds between start and end (0 for a single-second window)
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t <= self.end
    }

    /// Bisect at the midpoint into `[start, mid]` and `[mid + 1s, end]`.
    ///
    /// `None` for a single-second window.
    pub fn split(&self) -> Option<(Self, Self)> {
        let span = self.duration_secs();
        if span < 1 {
            return None;
        }
        let mid = self.start + TimeDelta::seconds(span / 2);
        let left = Self {
            start: self.start,
            end: mid,
        };
        let right = Self {
            start: mid + TimeDelta::seconds(1),
            end: self.end,
        };
        Some((left, right))
    }

    pub fn start_iso(&self) -> String {
        self.start.format(ISO_FORMAT).to_string()
    }

    pub fn end_iso(&self) -> String {
        self.end.format(ISO_FORMAT).to_string()
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.start_iso(), self.end_iso())
    }
}

/// Estimates how many records fall into a window; `None` if unknown
pub trait CountProbe {
    fn count(&mut self, window: &TimeWindow) -> Option<u64>;
}

impl<F> CountProbe for F
where
    F: FnMut(&TimeWindow) -> Option<u64>,
{
    fn count(&mut self, window: &TimeWindow) -> Option<u64> {
        self(window)
    }
}

/// A window the partitioner decided not to split further
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    pub window: TimeWindow,
    /// Probed result count; `None` when the probe failed
    pub estimate: Option<u64>,
}

/// Lazily yields disjoint leaves covering a window, left before right.
///
/// A leaf's estimate is at most `threshold`, or its duration is at most
/// `min_seconds`, or its count is unknown. Windows probing at zero are
/// dropped without being yielded.
pub struct Partitioner<P> {
    probe: P,
    threshold: u64,
    min_seconds: i64,
    pending: Vec<TimeWindow>,
    probes: usize,
    splits: usize,
}

impl<P: CountProbe> Partitioner<P> {
    pub fn new(window: TimeWindow, probe: P, threshold: u64, min_seconds: i64) -> Self {
        Self {
            probe,
            threshold,
            min_seconds,
            pending: vec![window],
            probes: 0,
            splits: 0,
        }
    }

    /// Probe calls made so far
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Bisections performed so far
    pub fn splits(&self) -> usize {
        self.splits
    }

    /// Give back the probe (e.g. to read its counters)
    pub fn into_probe(self) -> P {
        self.probe
    }
}

impl<P: CountProbe> Iterator for Partitioner<P> {
    type Item = Leaf;

    fn next(&mut self) -> Option<Leaf> {
        while let Some(window) = self.pending.pop() {
            self.probes += 1;
            let estimate = match self.probe.count(&window) {
                Some(0) => continue,
                Some(n) => n,
                None => {
                    log::warn!("Count unknown for {window}, streaming it unsplit");
                    return Some(Leaf {
                        window,
                        estimate: None,
                    });
                }
            };

            if estimate <= self.threshold || window.duration_secs() <= self.min_seconds {
                return Some(Leaf {
                    window,
                    estimate: Some(estimate),
                });
            }

            match window.split() {
                Some((left, right)) => {
                    log::debug!("Splitting {window} ({estimate} > {})", self.threshold);
                    self.splits += 1;
                    // Stack: push right first so left is visited first
                    self.pending.push(right);
                    self.pending.push(left);
                }
                None => {
                    return Some(Leaf {
                        window,
                        estimate: Some(estimate),
                    })
                }
            }
        }
        None
    }
}
