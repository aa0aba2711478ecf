//! Aggregation Engine
//!
//! The per-process series registry: owns one aggregator and one bounded
//! buffer per (symbol, timeframe) series, created lazily on first use.
//! Ingestion folds ticks and raw vendor bars into every configured
//! timeframe for the symbol, stores finalized bars, and publishes them on
//! the event bus.
//!
//! Series are fully independent partitions of state: each series is guarded
//! by its own mutex and no operation takes two series locks at once. The
//! registry map itself is only write-locked for the brief moment a new
//! series entry is created.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregator::{BarAggregator, IngestError};
use crate::domain::bar::{Bar, RawBar, SeriesKey, Tick, Timeframe};
use crate::domain::buffer::SeriesBuffer;
use crate::domain::sequencer::Sequencer;
use crate::infrastructure::bus::{BusEvent, SharedEventBus, Topic};

// =============================================================================
// Settings
// =============================================================================

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Per-series buffer capacity.
    pub buffer_capacity: usize,
    /// Timeframes aggregated for every ingested symbol.
    pub timeframes: Vec<Timeframe>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::domain::buffer::DEFAULT_CAPACITY,
            timeframes: vec![Timeframe::Min1, Timeframe::Min5, Timeframe::Min15],
        }
    }
}

// =============================================================================
// Last Price
// =============================================================================

/// Most recent traded price for a symbol, derived from the 1-minute series.
///
/// When no bar exists the marker is explicit (`has_data = false`, zero
/// price), never a stale or synthetic guess.
#[derive(Debug, Clone, Serialize)]
pub struct LastPrice {
    /// Normalized symbol.
    pub symbol: String,
    /// Close of the most recent 1-minute bar, or zero.
    pub price: Decimal,
    /// End of the bar the price came from.
    pub as_of: Option<DateTime<Utc>>,
    /// Whether any data backs this price.
    pub has_data: bool,
}

impl LastPrice {
    fn no_data(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            price: Decimal::ZERO,
            as_of: None,
            has_data: false,
        }
    }
}

// =============================================================================
// Series State
// =============================================================================

/// Aggregation and storage state for one series. One writer at a time.
struct SeriesState {
    aggregator: BarAggregator,
    buffer: SeriesBuffer,
}

// =============================================================================
// Aggregation Engine
// =============================================================================

/// Process-owned registry of all series state.
pub struct AggregationEngine {
    settings: EngineSettings,
    sequencer: Arc<Sequencer>,
    bus: SharedEventBus,
    series: RwLock<HashMap<SeriesKey, Arc<Mutex<SeriesState>>>>,
}

impl AggregationEngine {
    /// Create an engine with no series; entries appear lazily on first use.
    #[must_use]
    pub fn new(settings: EngineSettings, sequencer: Arc<Sequencer>, bus: SharedEventBus) -> Self {
        Self {
            settings,
            sequencer,
            bus,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// The shared sequencer.
    #[must_use]
    pub fn sequencer(&self) -> Arc<Sequencer> {
        Arc::clone(&self.sequencer)
    }

    /// The shared event bus.
    #[must_use]
    pub fn bus(&self) -> SharedEventBus {
        Arc::clone(&self.bus)
    }

    /// Timeframes aggregated per ingested symbol.
    #[must_use]
    pub fn timeframes(&self) -> &[Timeframe] {
        &self.settings.timeframes
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Fold a live tick into every configured timeframe for its symbol,
    /// publish the tick, and store/publish any bars it finalized.
    ///
    /// Out-of-order data is dropped per series with a warn log (a tick can
    /// be late for a fine timeframe yet still belong to the open bucket of
    /// a coarser one). Returns all bars finalized by this call.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the tick itself is malformed; no series state is
    /// touched in that case.
    pub fn ingest_tick(&self, tick: &Tick) -> Result<Vec<Bar>, IngestError> {
        let mut finalized = Vec::new();
        for (index, timeframe) in self.settings.timeframes.iter().enumerate() {
            let key = SeriesKey::new(&tick.symbol, *timeframe);
            let state = self.state_of(&key);
            let mut guard = state.lock();
            match guard.aggregator.process_tick(tick) {
                Ok(bars) => {
                    for bar in bars {
                        guard.buffer.push(bar.clone());
                        finalized.push(bar);
                    }
                }
                Err(err @ IngestError::InvalidInput { .. }) => {
                    // Validation is state-independent: if the tick is
                    // malformed for one series it is malformed for all,
                    // and no series has been touched yet.
                    debug_assert_eq!(index, 0);
                    return Err(err);
                }
                Err(err @ IngestError::OutOfOrder { .. }) => {
                    tracing::warn!(%key, %err, "Dropped out-of-order tick");
                }
            }
        }

        self.bus
            .publish(&Topic::tick(&tick.symbol), &BusEvent::Tick(tick.clone()));
        self.publish_finalized(&finalized);
        Ok(finalized)
    }

    /// Fold a raw vendor bar into every configured timeframe at least as
    /// coarse as the vendor interval, then store/publish finalized bars.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the raw bar is malformed; no series state is
    /// touched in that case.
    pub fn ingest_bar(
        &self,
        source_timeframe: Timeframe,
        raw: &RawBar,
    ) -> Result<Vec<Bar>, IngestError> {
        let mut finalized = Vec::new();
        for timeframe in &self.settings.timeframes {
            // A coarse vendor bar cannot be attributed to a finer bucket.
            if timeframe.width_ms() < source_timeframe.width_ms() {
                continue;
            }
            let key = SeriesKey::new(&raw.symbol, *timeframe);
            let state = self.state_of(&key);
            let mut guard = state.lock();
            match guard.aggregator.process_bar(raw) {
                Ok(bars) => {
                    for bar in bars {
                        guard.buffer.push(bar.clone());
                        finalized.push(bar);
                    }
                }
                Err(err @ IngestError::InvalidInput { .. }) => return Err(err),
                Err(err @ IngestError::OutOfOrder { .. }) => {
                    tracing::warn!(%key, %err, "Dropped out-of-order bar");
                }
            }
        }

        self.publish_finalized(&finalized);
        Ok(finalized)
    }

    /// Seed historical bars into one series' buffer, seq-stamping them in
    /// ascending time order. Seeded bars are history: stored but not
    /// published. Returns the number of bars seeded.
    pub fn seed_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        mut raw_bars: Vec<RawBar>,
    ) -> usize {
        raw_bars.sort_by_key(|b| b.ts);
        let key = SeriesKey::new(symbol, timeframe);
        let state = self.state_of(&key);
        let mut guard = state.lock();

        let mut seeded = 0;
        for raw in &raw_bars {
            if raw.open <= Decimal::ZERO || raw.low <= Decimal::ZERO || raw.high < raw.low {
                tracing::warn!(%key, ts = %raw.ts, "Skipped malformed historical bar");
                continue;
            }
            let bar_start = timeframe.bucket_start(raw.ts);
            guard.buffer.push(Bar {
                symbol: key.symbol().to_string(),
                timeframe,
                bar_start,
                bar_end: Bar::end_of(bar_start, timeframe),
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume.unwrap_or(0),
                seq: self.sequencer.next(),
            });
            seeded += 1;
        }
        seeded
    }

    /// Finalize every open interval (shutdown or gap-closing timer),
    /// storing and publishing the flushed bars.
    pub fn flush_all(&self) -> Vec<Bar> {
        let entries: Vec<Arc<Mutex<SeriesState>>> =
            self.series.read().values().map(Arc::clone).collect();

        let mut flushed = Vec::new();
        for state in entries {
            let mut guard = state.lock();
            if let Some(bar) = guard.aggregator.flush() {
                guard.buffer.push(bar.clone());
                flushed.push(bar);
            }
        }
        self.publish_finalized(&flushed);
        flushed
    }

    // =========================================================================
    // Consumer Read API
    // =========================================================================

    /// Last `n` finalized bars for a series, oldest-to-newest.
    #[must_use]
    pub fn latest(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Bar> {
        self.read_series(symbol, timeframe, |buffer| buffer.latest(n))
    }

    /// Finalized bars with `seq` greater than the cursor, in order.
    #[must_use]
    pub fn since(&self, symbol: &str, timeframe: Timeframe, seq: u64) -> Vec<Bar> {
        self.read_series(symbol, timeframe, |buffer| buffer.since_seq(seq))
    }

    /// Finalized bars with `bar_start` in the half-open `[start, end)`.
    #[must_use]
    pub fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Bar> {
        self.read_series(symbol, timeframe, |buffer| buffer.range(start, end))
    }

    /// Most recent traded price, from the 1-minute series.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> LastPrice {
        let last = self.read_series(symbol, Timeframe::Min1, SeriesBuffer::peek_last);
        last.map_or_else(
            || LastPrice::no_data(symbol),
            |bar| LastPrice {
                symbol: bar.symbol.clone(),
                price: bar.close,
                as_of: Some(bar.bar_end),
                has_data: true,
            },
        )
    }

    /// Run a closure against one series' buffer under its lock. Missing
    /// series are NOT created: reads must never allocate state.
    pub fn with_buffer<T>(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        f: impl FnOnce(&SeriesBuffer) -> T,
    ) -> Option<T> {
        let key = SeriesKey::new(symbol, timeframe);
        let state = self.series.read().get(&key).map(Arc::clone)?;
        let guard = state.lock();
        Some(f(&guard.buffer))
    }

    /// Number of materialized series.
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    fn read_series<T: Default>(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        f: impl FnOnce(&SeriesBuffer) -> T,
    ) -> T {
        self.with_buffer(symbol, timeframe, f).unwrap_or_default()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn state_of(&self, key: &SeriesKey) -> Arc<Mutex<SeriesState>> {
        if let Some(state) = self.series.read().get(key) {
            return Arc::clone(state);
        }

        let mut map = self.series.write();
        Arc::clone(map.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(SeriesState {
                aggregator: BarAggregator::new(key.clone(), Arc::clone(&self.sequencer)),
                buffer: SeriesBuffer::with_capacity(self.settings.buffer_capacity),
            }))
        }))
    }

    fn publish_finalized(&self, bars: &[Bar]) {
        for bar in bars {
            let key = SeriesKey::new(&bar.symbol, bar.timeframe);
            self.bus
                .publish(&Topic::for_bar(&key), &BusEvent::BarFinalized(bar.clone()));
        }
    }
}

/// Shared engine reference.
pub type SharedEngine = Arc<AggregationEngine>;

// =============================================================================
// Tests
// =============================================================================
