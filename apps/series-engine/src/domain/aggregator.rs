//! Per-Series Bar Aggregator
//!
//! State machine that folds incoming ticks and raw vendor bars into the
//! current open interval for one (symbol, timeframe) series and emits
//! finalized, immutable bars when the interval boundary is crossed.
//!
//! # State machine
//!
//! Two states per series: no open interval, or accumulating into exactly one
//! open interval. An incoming event whose bucket is newer than the open
//! interval finalizes it; an event in the same bucket merges; an event in an
//! older bucket is rejected as out-of-order and dropped by the caller.
//! Skipped buckets never synthesize filler bars; only buckets that actually
//! received data produce a bar.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use super::bar::{Bar, RawBar, SeriesKey, Tick};
use super::sequencer::Sequencer;

// =============================================================================
// Errors
// =============================================================================

/// Non-fatal ingestion rejections. The series state is untouched in all cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Malformed tick or bar (non-positive price, zero trade size).
    #[error("invalid input for {key}: {reason}")]
    InvalidInput {
        /// Series the input was routed to.
        key: SeriesKey,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Data older than the open interval. Dropped to preserve forward-only
    /// ordering; late data is never retried against a previous bucket.
    #[error("out-of-order data for {key}: bucket {bucket} precedes open interval {open_start}")]
    OutOfOrder {
        /// Series the input was routed to.
        key: SeriesKey,
        /// Bucket the late event mapped to.
        bucket: DateTime<Utc>,
        /// Start of the currently open interval.
        open_start: DateTime<Utc>,
    },
}

// =============================================================================
// Open Interval
// =============================================================================

/// The bar currently being built. Owned exclusively by the aggregator and
/// never exposed to consumers until finalized.
#[derive(Debug, Clone)]
struct OpenInterval {
    bar_start: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
}

impl OpenInterval {
    const fn seed(bar_start: DateTime<Utc>, update: &Update) -> Self {
        Self {
            bar_start,
            open: update.open,
            high: update.high,
            low: update.low,
            close: update.close,
            volume: update.volume,
        }
    }

    fn merge(&mut self, update: &Update) {
        self.high = self.high.max(update.high);
        self.low = self.low.min(update.low);
        self.close = update.close;
        self.volume = self.volume.saturating_add(update.volume);
    }
}

/// Normalized OHLCV contribution of one incoming event.
struct Update {
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
}

// =============================================================================
// Bar Aggregator
// =============================================================================

/// Aggregation state for one series.
///
/// Callers must serialize access per series (one writer at a time); the
/// engine wraps each aggregator in a per-series mutex. The sequencer is
/// shared process-wide so finalized bars from all series share one total
/// order.
#[derive(Debug)]
pub struct BarAggregator {
    key: SeriesKey,
    sequencer: Arc<Sequencer>,
    open: Option<OpenInterval>,
}

impl BarAggregator {
    /// Create an aggregator for a series with no open interval.
    #[must_use]
    pub const fn new(key: SeriesKey, sequencer: Arc<Sequencer>) -> Self {
        Self {
            key,
            sequencer,
            open: None,
        }
    }

    /// The series this aggregator owns.
    #[must_use]
    pub const fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Start of the currently open interval, if any.
    #[must_use]
    pub fn open_start(&self) -> Option<DateTime<Utc>> {
        self.open.as_ref().map(|oi| oi.bar_start)
    }

    /// Fold a tick into the series.
    ///
    /// Returns the bars finalized as a side effect of this call (zero or
    /// one; skipped buckets produce nothing).
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a non-positive price or zero size; `OutOfOrder`
    /// for a tick older than the open interval. Neither touches state.
    pub fn process_tick(&mut self, tick: &Tick) -> Result<Vec<Bar>, IngestError> {
        if tick.price <= Decimal::ZERO {
            return Err(self.invalid(format!("non-positive price {}", tick.price)));
        }
        if tick.size == 0 {
            return Err(self.invalid("zero trade size".to_string()));
        }

        let update = Update {
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.size,
        };
        self.fold(tick.ts, &update)
    }

    /// Fold a raw vendor bar into the series.
    ///
    /// Raw bars at a finer interval than the series merge into the open
    /// interval exactly like ticks. A missing vendor volume counts as 0.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for non-positive or inverted OHLC prices;
    /// `OutOfOrder` for a bar older than the open interval.
    pub fn process_bar(&mut self, raw: &RawBar) -> Result<Vec<Bar>, IngestError> {
        for (name, price) in [
            ("open", raw.open),
            ("high", raw.high),
            ("low", raw.low),
            ("close", raw.close),
        ] {
            if price <= Decimal::ZERO {
                return Err(self.invalid(format!("non-positive {name} price {price}")));
            }
        }
        if raw.high < raw.low {
            return Err(self.invalid(format!("high {} below low {}", raw.high, raw.low)));
        }

        let update = Update {
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume.unwrap_or(0),
        };
        self.fold(raw.ts, &update)
    }

    /// Finalize the open interval without waiting for newer data.
    ///
    /// Used at shutdown and by gap-closing timers.
    pub fn flush(&mut self) -> Option<Bar> {
        self.open.take().map(|oi| self.finalize(&oi))
    }

    fn fold(&mut self, ts: DateTime<Utc>, update: &Update) -> Result<Vec<Bar>, IngestError> {
        let bucket = self.key.timeframe().bucket_start(ts);

        let Some(open) = &mut self.open else {
            self.open = Some(OpenInterval::seed(bucket, update));
            return Ok(vec![]);
        };

        if bucket == open.bar_start {
            open.merge(update);
            return Ok(vec![]);
        }

        if bucket < open.bar_start {
            return Err(IngestError::OutOfOrder {
                key: self.key.clone(),
                bucket,
                open_start: open.bar_start,
            });
        }

        // Boundary crossed: finalize, then open the new bucket. Skipped
        // buckets had no data and therefore produce no bar.
        let finished = self.open.replace(OpenInterval::seed(bucket, update));
        let finalized = finished.map(|oi| self.finalize(&oi));
        Ok(finalized.into_iter().collect())
    }

    fn finalize(&self, oi: &OpenInterval) -> Bar {
        Bar {
            symbol: self.key.symbol().to_string(),
            timeframe: self.key.timeframe(),
            bar_start: oi.bar_start,
            bar_end: Bar::end_of(oi.bar_start, self.key.timeframe()),
            open: oi.open,
            high: oi.high,
            low: oi.low,
            close: oi.close,
            volume: oi.volume,
            seq: self.sequencer.next(),
        }
    }

    fn invalid(&self, reason: String) -> IngestError {
        IngestError::InvalidInput {
            key: self.key.clone(),
            reason,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::domain::bar::Timeframe;

    use super::*;

    fn aggregator(timeframe: Timeframe) -> BarAggregator {
        BarAggregator::new(
            SeriesKey::new("AAPL", timeframe),
            Arc::new(Sequencer::new()),
        )
    }

    fn tick_at(ms: i64, price: i64) -> Tick {
        Tick {
            symbol: "AAPL".to_string(),
            price: Decimal::from(price),
            size: 10,
            ts: DateTime::from_timestamp_millis(ms).unwrap(),
        }
    }

    fn raw_bar_at(ms: i64, price: i64) -> RawBar {
        RawBar {
            symbol: "AAPL".to_string(),
            ts: DateTime::from_timestamp_millis(ms).unwrap(),
            open: Decimal::from(price),
            high: Decimal::from(price + 1),
            low: Decimal::from(price - 1),
            close: Decimal::from(price),
            volume: Some(100),
        }
    }

    #[test]
    fn first_tick_opens_interval_no_finalization() {
        let mut agg = aggregator(Timeframe::Min1);
        let finalized = agg.process_tick(&tick_at(61_000, 100)).unwrap();
        assert!(finalized.is_empty());
        assert_eq!(
            agg.open_start().unwrap().timestamp_millis(),
            60_000 // floored to the minute
        );
    }

    #[test]
    fn same_bucket_merges_ohlcv() {
        let mut agg = aggregator(Timeframe::Min1);
        agg.process_tick(&tick_at(60_000, 100)).unwrap();
        agg.process_tick(&tick_at(60_500, 105)).unwrap();
        agg.process_tick(&tick_at(61_000, 95)).unwrap();

        let bar = agg.flush().unwrap();
        assert_eq!(bar.open, Decimal::from(100));
        assert_eq!(bar.high, Decimal::from(105));
        assert_eq!(bar.low, Decimal::from(95));
        assert_eq!(bar.close, Decimal::from(95));
        assert_eq!(bar.volume, 30);
    }

    #[test]
    fn boundary_crossing_finalizes_exactly_prior_buckets() {
        let mut agg = aggregator(Timeframe::Min1);

        assert!(agg.process_bar(&raw_bar_at(60_000, 100)).unwrap().is_empty());

        let second = agg.process_bar(&raw_bar_at(120_000, 101)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].bar_start.timestamp_millis(), 60_000);

        let third = agg.process_bar(&raw_bar_at(180_000, 102)).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].bar_start.timestamp_millis(), 120_000);

        // The newest bucket stays open.
        assert_eq!(agg.open_start().unwrap().timestamp_millis(), 180_000);
    }

    #[test]
    fn skipped_buckets_produce_no_filler_bars() {
        let mut agg = aggregator(Timeframe::Min1);
        agg.process_tick(&tick_at(60_000, 100)).unwrap();

        // Jump three buckets ahead: only the open interval finalizes.
        let finalized = agg.process_tick(&tick_at(240_000, 104)).unwrap();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].bar_start.timestamp_millis(), 60_000);
        assert_eq!(agg.open_start().unwrap().timestamp_millis(), 240_000);
    }

    #[test]
    fn out_of_order_is_rejected_and_state_untouched() {
        let mut agg = aggregator(Timeframe::Min1);
        agg.process_tick(&tick_at(120_000, 100)).unwrap();

        let err = agg.process_tick(&tick_at(60_000, 99)).unwrap_err();
        assert!(matches!(err, IngestError::OutOfOrder { .. }));

        // Open interval unchanged, nothing finalized by a later flush merge.
        assert_eq!(agg.open_start().unwrap().timestamp_millis(), 120_000);
        let bar = agg.flush().unwrap();
        assert_eq!(bar.close, Decimal::from(100));
        assert_eq!(bar.volume, 10);
    }

    #[test]
    fn invalid_tick_rejected_without_corrupting_state() {
        let mut agg = aggregator(Timeframe::Min1);
        agg.process_tick(&tick_at(60_000, 100)).unwrap();

        let mut bad = tick_at(60_500, 100);
        bad.price = Decimal::ZERO;
        assert!(matches!(
            agg.process_tick(&bad),
            Err(IngestError::InvalidInput { .. })
        ));

        let mut zero_size = tick_at(60_500, 105);
        zero_size.size = 0;
        assert!(matches!(
            agg.process_tick(&zero_size),
            Err(IngestError::InvalidInput { .. })
        ));

        let bar = agg.flush().unwrap();
        assert_eq!(bar.high, Decimal::from(100));
        assert_eq!(bar.volume, 10);
    }

    #[test]
    fn invalid_raw_bar_rejected() {
        let mut agg = aggregator(Timeframe::Min1);

        let mut inverted = raw_bar_at(60_000, 100);
        inverted.high = Decimal::from(90);
        inverted.low = Decimal::from(110);
        assert!(matches!(
            agg.process_bar(&inverted),
            Err(IngestError::InvalidInput { .. })
        ));
        assert!(agg.open_start().is_none());
    }

    #[test]
    fn finalized_bar_does_not_alias_caller_input() {
        let mut agg = aggregator(Timeframe::Min1);
        let mut raw = raw_bar_at(60_000, 100);
        agg.process_bar(&raw).unwrap();

        // Mutating the caller's record after the fact must not leak into
        // the finalized bar.
        raw.close = Decimal::from(9_999);
        raw.volume = Some(0);

        let bar = agg.flush().unwrap();
        assert_eq!(bar.close, Decimal::from(100));
        assert_eq!(bar.volume, 100);
    }

    #[test]
    fn seq_stamped_at_finalization_in_order() {
        let sequencer = Arc::new(Sequencer::new());
        let mut agg = BarAggregator::new(
            SeriesKey::new("AAPL", Timeframe::Min1),
            Arc::clone(&sequencer),
        );

        agg.process_tick(&tick_at(60_000, 100)).unwrap();
        // Nothing finalized yet, so no seq consumed.
        assert_eq!(sequencer.current(), 0);

        let first = agg.process_tick(&tick_at(120_000, 101)).unwrap();
        let second = agg.process_tick(&tick_at(180_000, 102)).unwrap();
        assert_eq!(first[0].seq, 1);
        assert_eq!(second[0].seq, 2);
    }

    #[test]
    fn flush_on_empty_returns_none() {
        let mut agg = aggregator(Timeframe::Min5);
        assert!(agg.flush().is_none());
        agg.process_tick(&tick_at(300_000, 50)).unwrap();
        assert!(agg.flush().is_some());
        assert!(agg.flush().is_none());
    }

    #[test]
    fn five_minute_bucketing() {
        let mut agg = aggregator(Timeframe::Min5);
        agg.process_tick(&tick_at(301_000, 100)).unwrap();
        assert_eq!(agg.open_start().unwrap().timestamp_millis(), 300_000);

        // Still inside the same 5-minute bucket.
        assert!(agg.process_tick(&tick_at(599_000, 101)).unwrap().is_empty());
        let finalized = agg.process_tick(&tick_at(600_000, 102)).unwrap();
        assert_eq!(finalized.len(), 1);
    }
}
