//! Bounded Series Buffer
//!
//! Capped, append-only-per-series store of finalized bars, queryable by
//! count, by sequence cutoff, and by time range. Capacity is fixed at
//! construction; the oldest bars are evicted first. This buffer is the only
//! replay source for resuming consumers; there is no durable log.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::bar::Bar;

/// Default per-series capacity when the config does not override it.
pub const DEFAULT_CAPACITY: usize = 500;

/// FIFO-bounded store of finalized bars for one series.
///
/// Stored bars are immutable: every read returns owned clones and no
/// operation mutates a bar in place.
#[derive(Debug)]
pub struct SeriesBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
    /// Highest seq ever evicted (or discarded by `clear`). Lets the resume
    /// layer distinguish "history evicted" from "nothing newer than cursor".
    evicted_watermark: Option<u64>,
}

impl SeriesBuffer {
    /// Create a buffer with the given capacity (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
            evicted_watermark: None,
        }
    }

    /// Append a finalized bar, evicting from the front past capacity.
    pub fn push(&mut self, bar: Bar) {
        self.bars.push_back(bar);
        while self.bars.len() > self.capacity {
            if let Some(evicted) = self.bars.pop_front() {
                self.note_evicted(evicted.seq);
            }
        }
    }

    /// Append several finalized bars in order.
    pub fn push_many(&mut self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.push(bar);
        }
    }

    /// Last `n` bars in insertion order (oldest-to-newest), or fewer.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<Bar> {
        let start = self.bars.len().saturating_sub(n);
        self.bars.iter().skip(start).cloned().collect()
    }

    /// All stored bars with `seq > cursor`, in order. Basis for resumption.
    #[must_use]
    pub fn since_seq(&self, cursor: u64) -> Vec<Bar> {
        self.bars
            .iter()
            .filter(|b| b.seq > cursor)
            .cloned()
            .collect()
    }

    /// Bars whose `bar_start` falls in the half-open interval `[start, end)`.
    #[must_use]
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
        self.bars
            .iter()
            .filter(|b| b.bar_start >= start && b.bar_start < end)
            .cloned()
            .collect()
    }

    /// Most recent bar, if any.
    #[must_use]
    pub fn peek_last(&self) -> Option<Bar> {
        self.bars.back().cloned()
    }

    /// `bar_start` of the oldest retained bar. `None` when empty, which lets a
    /// consumer detect that requested history has already been evicted.
    #[must_use]
    pub fn oldest_ts(&self) -> Option<DateTime<Utc>> {
        self.bars.front().map(|b| b.bar_start)
    }

    /// Whether the given cursor points below retained history.
    #[must_use]
    pub fn is_evicted(&self, cursor: u64) -> bool {
        self.evicted_watermark.is_some_and(|w| cursor < w)
    }

    /// Number of retained bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether the buffer holds no bars.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained bars. Discarded bars count as evicted.
    pub fn clear(&mut self) {
        if let Some(last) = self.bars.back() {
            self.note_evicted(last.seq);
        }
        self.bars.clear();
    }

    fn note_evicted(&mut self, seq: u64) {
        self.evicted_watermark = Some(self.evicted_watermark.map_or(seq, |w| w.max(seq)));
    }
}

impl Default for SeriesBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::bar::Timeframe;

    use super::*;

    fn bar(seq: u64, start_ms: i64) -> Bar {
        let bar_start = DateTime::from_timestamp_millis(start_ms).unwrap();
        Bar {
            symbol: "AAPL".to_string(),
            timeframe: Timeframe::Min1,
            bar_start,
            bar_end: Bar::end_of(bar_start, Timeframe::Min1),
            open: Decimal::from(100),
            high: Decimal::from(101),
            low: Decimal::from(99),
            close: Decimal::from(100),
            volume: 10,
            seq,
        }
    }

    fn filled(capacity: usize, count: u64) -> SeriesBuffer {
        let mut buf = SeriesBuffer::with_capacity(capacity);
        for i in 0..count {
            buf.push(bar(i + 1, i64::try_from(i).unwrap() * 60_000));
        }
        buf
    }

    #[test]
    fn capacity_bound_retains_most_recent() {
        let buf = filled(3, 10);
        assert_eq!(buf.len(), 3);
        let retained: Vec<u64> = buf.latest(10).iter().map(|b| b.seq).collect();
        assert_eq!(retained, vec![8, 9, 10]);
    }

    #[test]
    fn latest_returns_insertion_order() {
        let buf = filled(10, 5);
        let last_two: Vec<u64> = buf.latest(2).iter().map(|b| b.seq).collect();
        assert_eq!(last_two, vec![4, 5]);

        // Asking for more than exists returns everything.
        assert_eq!(buf.latest(100).len(), 5);
    }

    #[test]
    fn since_seq_is_exclusive_and_ordered() {
        let buf = filled(10, 10);
        let resumed: Vec<u64> = buf.since_seq(7).iter().map(|b| b.seq).collect();
        assert_eq!(resumed, vec![8, 9, 10]);
        assert!(buf.since_seq(10).is_empty());
    }

    #[test]
    fn range_is_half_open_on_bar_start() {
        let buf = filled(10, 5); // bar_starts at 0, 60k, 120k, 180k, 240k
        let start = DateTime::from_timestamp_millis(60_000).unwrap();
        let end = DateTime::from_timestamp_millis(180_000).unwrap();

        let got: Vec<i64> = buf
            .range(start, end)
            .iter()
            .map(|b| b.bar_start.timestamp_millis())
            .collect();
        assert_eq!(got, vec![60_000, 120_000]);
    }

    #[test]
    fn peek_last_and_oldest_ts() {
        let mut buf = SeriesBuffer::with_capacity(2);
        assert!(buf.peek_last().is_none());
        assert!(buf.oldest_ts().is_none());

        buf.push_many([bar(1, 0), bar(2, 60_000), bar(3, 120_000)]);
        assert_eq!(buf.peek_last().unwrap().seq, 3);
        assert_eq!(buf.oldest_ts().unwrap().timestamp_millis(), 60_000);
    }

    #[test]
    fn eviction_watermark_tracks_dropped_history() {
        let mut buf = SeriesBuffer::with_capacity(3);
        assert!(!buf.is_evicted(0));

        for i in 1..=5 {
            buf.push(bar(i, i64::from(u32::try_from(i).unwrap()) * 60_000));
        }
        // Bars 1 and 2 were evicted.
        assert!(buf.is_evicted(0));
        assert!(buf.is_evicted(1));
        assert!(!buf.is_evicted(2));
        assert!(!buf.is_evicted(5));
    }

    #[test]
    fn clear_counts_as_eviction() {
        let mut buf = filled(10, 4);
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.is_evicted(3));
        assert!(!buf.is_evicted(4));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buf = SeriesBuffer::with_capacity(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(bar(1, 0));
        buf.push(bar(2, 60_000));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.peek_last().unwrap().seq, 2);
    }

    #[test]
    fn reads_do_not_mutate_stored_bars() {
        let buf = filled(10, 3);
        let mut copy = buf.latest(1).remove(0);
        copy.close = Decimal::from(9_999);
        assert_eq!(buf.peek_last().unwrap().close, Decimal::from(100));
    }
}
