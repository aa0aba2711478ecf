//! Port Interfaces
//!
//! Contracts for external collaborators, following the hexagonal pattern:
//! the aggregation core only ever sees these traits, never a vendor SDK.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketFeed`: the upstream quote/trade source: health check,
//!   historical seeding, and per-symbol live ingestion control. Live events
//!   arrive on an mpsc channel handed to the feed at construction.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::bar::{RawBar, Tick, Timeframe};

// =============================================================================
// Feed Health
// =============================================================================

/// Severity of a failed feed health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    /// Do not ingest from this feed; fall back to the simulated source.
    Fatal,
    /// Ingest, but report the feed as degraded.
    Warn,
}

/// Result of the vendor health/auth check.
#[derive(Debug, Clone)]
pub struct FeedHealth {
    /// Whether the feed is usable as-is.
    pub ok: bool,
    /// Vendor-supplied failure reason, when not ok.
    pub reason: Option<String>,
    /// Severity, meaningful when not ok.
    pub level: HealthLevel,
}

impl FeedHealth {
    /// A passing health check.
    #[must_use]
    pub const fn healthy() -> Self {
        Self {
            ok: true,
            reason: None,
            level: HealthLevel::Warn,
        }
    }

    /// A degraded-but-usable feed.
    #[must_use]
    pub const fn degraded(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            level: HealthLevel::Warn,
        }
    }

    /// An unusable feed.
    #[must_use]
    pub const fn fatal(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            level: HealthLevel::Fatal,
        }
    }

    /// Whether ingestion must not proceed from this feed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.ok && self.level == HealthLevel::Fatal
    }
}

// =============================================================================
// Feed Events and Errors
// =============================================================================

/// Events a feed delivers on its mpsc channel.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Feed connection established.
    Connected,
    /// Feed connection lost.
    Disconnected,
    /// A live trade tick.
    Tick(Tick),
    /// A live vendor bar for one source interval.
    Bar {
        /// Vendor interval of the raw bar.
        timeframe: Timeframe,
        /// The raw bar payload.
        bar: RawBar,
    },
    /// A non-fatal feed error.
    Error(String),
}

/// Feed collaborator failures. None of these are fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Feed cannot be reached or refused the request.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    /// Authentication with the vendor failed.
    #[error("feed authentication failed: {0}")]
    Auth(String),

    /// The vendor does not recognize the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

// =============================================================================
// Market Feed Port
// =============================================================================

/// Upstream quote/trade source.
///
/// `start`/`stop` control live ingestion per symbol; live events flow
/// through the channel the implementation was constructed with.
/// `fetch_history` is the only call in the core that blocks on I/O, and
/// callers must invoke it outside any per-series lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Vendor health/auth check.
    async fn health(&self) -> FeedHealth;

    /// Fetch up to `limit` recent historical bars for one series,
    /// oldest-to-newest.
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<RawBar>, FeedError>;

    /// Begin live ingestion for a symbol. Idempotent.
    async fn start(&self, symbol: &str) -> Result<(), FeedError>;

    /// Stop live ingestion for a symbol. Idempotent.
    async fn stop(&self, symbol: &str) -> Result<(), FeedError>;
}

// =============================================================================
// Tests
// =============================================================================
