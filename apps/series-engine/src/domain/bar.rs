//! Market Series Core Types
//!
//! Canonical internal representation of market time-series data: ticks,
//! raw vendor bars, finalized OHLCV bars, and the series key that routes
//! them. These types are transport-agnostic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Timeframe
// =============================================================================

/// Fixed aggregation interval for a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// One-minute bars.
    #[serde(rename = "1m")]
    Min1,
    /// Five-minute bars.
    #[serde(rename = "5m")]
    Min5,
    /// Fifteen-minute bars.
    #[serde(rename = "15m")]
    Min15,
    /// One-hour bars.
    #[serde(rename = "1h")]
    Hour1,
    /// Daily bars.
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    /// All supported timeframes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Min1, Self::Min5, Self::Min15, Self::Hour1, Self::Day1]
    }

    /// Interval width in milliseconds.
    #[must_use]
    pub const fn width_ms(self) -> i64 {
        match self {
            Self::Min1 => 60_000,
            Self::Min5 => 300_000,
            Self::Min15 => 900_000,
            Self::Hour1 => 3_600_000,
            Self::Day1 => 86_400_000,
        }
    }

    /// Canonical short name ("1m", "5m", ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
        }
    }

    /// Floor a timestamp to the start of its interval bucket.
    #[must_use]
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.width_ms();
        let floored = ts.timestamp_millis().div_euclid(width) * width;
        DateTime::from_timestamp_millis(floored).unwrap_or(ts)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a timeframe string is not recognized.
///
/// Unknown timeframes are a hard parse error rather than a silent default:
/// a mis-keyed series would route bars into the wrong aggregation state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timeframe: {0}")]
pub struct TimeframeParseError(pub String);

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Self::Min1),
            "5m" | "5min" => Ok(Self::Min5),
            "15m" | "15min" => Ok(Self::Min15),
            "1h" | "60m" => Ok(Self::Hour1),
            "1d" | "d" | "day" => Ok(Self::Day1),
            other => Err(TimeframeParseError(other.to_string())),
        }
    }
}

// =============================================================================
// Series Key
// =============================================================================

/// Identifies one aggregation series: a (symbol, timeframe) pair.
///
/// Symbols are uppercased at construction so lookups are case-insensitive.
/// One buffer and one aggregator state exist per key, created lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    symbol: String,
    timeframe: Timeframe,
}

impl SeriesKey {
    /// Create a key, normalizing the symbol to uppercase.
    #[must_use]
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            timeframe,
        }
    }

    /// The normalized symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The series timeframe.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A single trade event.
///
/// Ticks are ephemeral: they feed the aggregator and are published on the
/// event bus, but are never retained beyond the current aggregation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument symbol.
    pub symbol: String,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub size: u64,
    /// Trade timestamp.
    pub ts: DateTime<Utc>,
}

// =============================================================================
// Raw Bar
// =============================================================================

/// A vendor-supplied bar before aggregation.
///
/// Raw bars may arrive at a finer interval than the target series (e.g.
/// 1-minute vendor bars folded into a 5-minute series) and are merged into
/// the open interval exactly like ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBar {
    /// Instrument symbol.
    pub symbol: String,
    /// Bar timestamp (start of the vendor interval).
    pub ts: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume, if the vendor reports one.
    pub volume: Option<u64>,
}

// =============================================================================
// Bar
// =============================================================================

/// A finalized, immutable OHLCV bar.
///
/// Once finalized a bar is never mutated; any transformation must produce a
/// new value. `seq` is unique and strictly increasing across the whole
/// process (not per series), so a single cursor totally orders bars from
/// different series. Within one series, ordering by `bar_start` and by `seq`
/// is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument symbol.
    pub symbol: String,
    /// Aggregation interval of the owning series.
    pub timeframe: Timeframe,
    /// Interval start (inclusive).
    pub bar_start: DateTime<Utc>,
    /// Interval end (exclusive): `bar_start` + interval width.
    pub bar_end: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Accumulated volume.
    pub volume: u64,
    /// Process-wide sequence number, assigned exactly once at finalization.
    pub seq: u64,
}

impl Bar {
    /// Interval end for a given start and timeframe.
    #[must_use]
    pub fn end_of(bar_start: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
        bar_start + Duration::milliseconds(timeframe.width_ms())
    }
}

// =============================================================================
// Tests
// =============================================================================
