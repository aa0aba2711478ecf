//! Feed Subscription Manager
//!
//! Reference-counted lifecycle control over which symbols are actively
//! ingested. Multiple logical consumers share one underlying feed
//! subscription per symbol; the first subscribe seeds recent history into
//! the series buffers, and teardown after the last unsubscribe is deferred
//! by a TTL so subscribe/unsubscribe thrash never re-triggers expensive
//! seeding or feed churn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::application::ports::{FeedError, MarketFeed};
use crate::application::services::engine::SharedEngine;

// =============================================================================
// Settings and Outcomes
// =============================================================================

/// Default time a zero-refcount subscription survives before teardown.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(300);

/// Default number of historical bars seeded per series on first subscribe.
pub const DEFAULT_SEED_LIMIT: usize = 100;

/// Subscription manager construction parameters.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Time a zero-refcount subscription survives before teardown.
    pub idle_ttl: Duration,
    /// Default per-series seed limit.
    pub seed_limit: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            idle_ttl: DEFAULT_IDLE_TTL,
            seed_limit: DEFAULT_SEED_LIMIT,
        }
    }
}

/// Per-call seeding options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOptions {
    /// Override the configured per-series seed limit.
    pub seed_limit: Option<usize>,
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Historical bars seeded by this call (0 on idempotent re-subscribe).
    pub seeded: usize,
    /// Logical subscriber count after this call.
    pub ref_count: usize,
}

// =============================================================================
// Subscription Record
// =============================================================================

#[derive(Debug, Clone)]
struct SubscriptionRecord {
    ref_count: usize,
    last_touched_at: Instant,
    watchlist: bool,
}

impl SubscriptionRecord {
    fn sweepable(&self, ttl: Duration, now: Instant) -> bool {
        self.ref_count == 0
            && !self.watchlist
            && now.saturating_duration_since(self.last_touched_at) >= ttl
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Tracks logical subscribers per symbol and drives the feed accordingly.
pub struct SubscriptionManager {
    engine: SharedEngine,
    feed: Arc<dyn MarketFeed>,
    settings: SubscriptionSettings,
    records: Mutex<HashMap<String, SubscriptionRecord>>,
}

impl SubscriptionManager {
    /// Create a manager with no active subscriptions.
    #[must_use]
    pub fn new(
        engine: SharedEngine,
        feed: Arc<dyn MarketFeed>,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            engine,
            feed,
            settings,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a logical consumer to a symbol.
    ///
    /// The first subscribe creates the record, seeds up to the seed limit of
    /// historical bars per configured timeframe, and starts live ingestion.
    /// Repeat subscribes only increment the ref count (`seeded = 0`); a
    /// pending TTL teardown is cancelled implicitly because the ref count
    /// becomes positive again.
    ///
    /// # Errors
    ///
    /// Propagates a feed failure to start live ingestion; the record is
    /// rolled back so a retry behaves like a fresh first subscribe. Seeding
    /// failures are degraded-mode (logged, `seeded = 0`), not errors.
    pub async fn subscribe(
        &self,
        symbol: &str,
        opts: SeedOptions,
    ) -> Result<SubscribeOutcome, FeedError> {
        let symbol = normalize(symbol);

        // Record insertion happens before any feed I/O so a concurrent
        // subscribe for the same symbol sees the record and stays
        // idempotent instead of double-seeding.
        {
            let mut records = self.records.lock();
            if let Some(record) = records.get_mut(&symbol) {
                record.ref_count += 1;
                record.last_touched_at = Instant::now();
                return Ok(SubscribeOutcome {
                    seeded: 0,
                    ref_count: record.ref_count,
                });
            }
            records.insert(
                symbol.clone(),
                SubscriptionRecord {
                    ref_count: 1,
                    last_touched_at: Instant::now(),
                    watchlist: false,
                },
            );
        }

        let seed_limit = opts.seed_limit.unwrap_or(self.settings.seed_limit);
        let seeded = self.seed(&symbol, seed_limit).await;

        if let Err(err) = self.feed.start(&symbol).await {
            tracing::error!(symbol = %symbol, error = %err, "Failed to start live ingestion");
            self.records.lock().remove(&symbol);
            return Err(err);
        }

        tracing::info!(symbol = %symbol, seeded, "Subscribed");
        Ok(SubscribeOutcome {
            seeded,
            ref_count: 1,
        })
    }

    /// Drop one logical consumer.
    ///
    /// Reaching zero does not stop the feed: the record is timestamped and
    /// left for [`Self::sweep`] to tear down once the TTL elapses with the
    /// ref count still zero.
    pub fn unsubscribe(&self, symbol: &str) {
        let symbol = normalize(symbol);
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&symbol) else {
            return;
        };
        record.ref_count = record.ref_count.saturating_sub(1);
        record.last_touched_at = Instant::now();
        if record.ref_count == 0 {
            tracing::debug!(symbol = %symbol, "Subscription idle, teardown deferred");
        }
    }

    /// Pin or unpin a symbol's watchlist membership. Watchlisted symbols
    /// are never swept while idle.
    pub fn set_watchlist(&self, symbol: &str, member: bool) {
        let symbol = normalize(symbol);
        if let Some(record) = self.records.lock().get_mut(&symbol) {
            record.watchlist = member;
        }
    }

    /// Tear down feeds whose subscriptions have been idle past the TTL.
    ///
    /// Returns the symbols torn down. Intended to run from a background
    /// interval task; safe to call at any time.
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut records = self.records.lock();
            let expired: Vec<String> = records
                .iter()
                .filter(|(_, r)| r.sweepable(self.settings.idle_ttl, now))
                .map(|(s, _)| s.clone())
                .collect();
            for symbol in &expired {
                records.remove(symbol);
            }
            expired
        };

        for symbol in &expired {
            if let Err(err) = self.feed.stop(symbol).await {
                tracing::warn!(symbol = %symbol, error = %err, "Feed stop failed during sweep");
            } else {
                tracing::info!(symbol = %symbol, "Idle subscription torn down");
            }
        }
        expired
    }

    /// Whether a symbol currently has at least one logical subscriber.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.records
            .lock()
            .get(&normalize(symbol))
            .is_some_and(|r| r.ref_count > 0)
    }

    /// Symbols with at least one logical subscriber, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .records
            .lock()
            .iter()
            .filter(|(_, r)| r.ref_count > 0)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Number of symbols with at least one logical subscriber.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.ref_count > 0)
            .count()
    }

    async fn seed(&self, symbol: &str, seed_limit: usize) -> usize {
        if seed_limit == 0 {
            return 0;
        }

        let mut seeded = 0;
        for timeframe in self.engine.timeframes().to_vec() {
            match self.feed.fetch_history(symbol, timeframe, seed_limit).await {
                Ok(raw_bars) => {
                    seeded += self.engine.seed_history(symbol, timeframe, raw_bars);
                }
                Err(err) => {
                    tracing::warn!(
                        symbol = %symbol,
                        timeframe = %timeframe,
                        error = %err,
                        "Historical seeding failed, continuing without history"
                    );
                }
            }
        }
        seeded
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use crate::application::ports::MockMarketFeed;
    use crate::application::services::engine::{AggregationEngine, EngineSettings};
    use crate::domain::bar::{RawBar, Timeframe};
    use crate::domain::sequencer::Sequencer;
    use crate::infrastructure::bus::EventBus;

    use super::*;

    fn engine() -> SharedEngine {
        Arc::new(AggregationEngine::new(
            EngineSettings {
                buffer_capacity: 32,
                timeframes: vec![Timeframe::Min1],
            },
            Arc::new(Sequencer::new()),
            Arc::new(EventBus::new()),
        ))
    }

    fn history(count: usize) -> Vec<RawBar> {
        (0..count)
            .map(|i| RawBar {
                symbol: "AAPL".to_string(),
                ts: DateTime::from_timestamp_millis(i64::try_from(i).unwrap() * 60_000).unwrap(),
                open: Decimal::from(100),
                high: Decimal::from(101),
                low: Decimal::from(99),
                close: Decimal::from(100),
                volume: Some(10),
            })
            .collect()
    }

    fn manager_with(feed: MockMarketFeed, ttl: Duration) -> SubscriptionManager {
        SubscriptionManager::new(
            engine(),
            Arc::new(feed),
            SubscriptionSettings {
                idle_ttl: ttl,
                seed_limit: 5,
            },
        )
    }

    #[tokio::test]
    async fn first_subscribe_seeds_and_starts_feed() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history()
            .times(1)
            .returning(|_, _, _| Ok(history(5)));
        feed.expect_start().times(1).returning(|_| Ok(()));

        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        let outcome = manager.subscribe("aapl", SeedOptions::default()).await.unwrap();

        assert_eq!(outcome.seeded, 5);
        assert_eq!(outcome.ref_count, 1);
        assert!(manager.is_subscribed("AAPL"));
    }

    #[tokio::test]
    async fn second_subscribe_is_idempotent() {
        let mut feed = MockMarketFeed::new();
        // Seeding and feed start happen exactly once.
        feed.expect_fetch_history()
            .times(1)
            .returning(|_, _, _| Ok(history(3)));
        feed.expect_start().times(1).returning(|_| Ok(()));

        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();
        let second = manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();

        assert_eq!(second.seeded, 0);
        assert_eq!(second.ref_count, 2);
        assert!(manager.is_subscribed("AAPL"));
        assert_eq!(manager.count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_defers_teardown_until_ttl() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history().returning(|_, _, _| Ok(vec![]));
        feed.expect_start().times(1).returning(|_| Ok(()));
        feed.expect_stop().times(1).returning(|_| Ok(()));

        let manager = manager_with(feed, Duration::from_secs(300));

        tokio::time::pause();
        manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();
        manager.unsubscribe("AAPL");
        assert!(!manager.is_subscribed("AAPL"));

        // Before the TTL the sweep leaves the feed alone.
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(manager.sweep().await.is_empty());

        // After the TTL the feed is stopped and the record removed.
        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(manager.sweep().await, vec!["AAPL".to_string()]);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn resubscribe_before_ttl_cancels_teardown_without_reseeding() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history()
            .times(1)
            .returning(|_, _, _| Ok(history(2)));
        feed.expect_start().times(1).returning(|_| Ok(()));
        // No stop call expected.

        let manager = manager_with(feed, Duration::from_secs(300));

        tokio::time::pause();
        manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();
        manager.unsubscribe("AAPL");

        tokio::time::advance(Duration::from_secs(100)).await;
        let outcome = manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();
        assert_eq!(outcome.seeded, 0);

        // Even long after the original TTL, the live ref count protects it.
        tokio::time::advance(Duration::from_secs(1_000)).await;
        assert!(manager.sweep().await.is_empty());
        assert!(manager.is_subscribed("AAPL"));
    }

    #[tokio::test]
    async fn watchlist_pins_idle_subscription() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history().returning(|_, _, _| Ok(vec![]));
        feed.expect_start().times(1).returning(|_| Ok(()));

        let manager = manager_with(feed, Duration::from_secs(10));

        tokio::time::pause();
        manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();
        manager.set_watchlist("AAPL", true);
        manager.unsubscribe("AAPL");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(manager.sweep().await.is_empty());
    }

    #[tokio::test]
    async fn seeding_failure_degrades_instead_of_failing() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history()
            .returning(|_, _, _| Err(FeedError::Unavailable("rate limited".to_string())));
        feed.expect_start().times(1).returning(|_| Ok(()));

        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        let outcome = manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();

        assert_eq!(outcome.seeded, 0);
        assert!(manager.is_subscribed("AAPL"));
    }

    #[tokio::test]
    async fn feed_start_failure_rolls_back_record() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history().returning(|_, _, _| Ok(vec![]));
        feed.expect_start()
            .times(2)
            .returning(|_| Err(FeedError::Auth("expired key".to_string())));

        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        assert!(manager.subscribe("AAPL", SeedOptions::default()).await.is_err());
        assert!(!manager.is_subscribed("AAPL"));

        // A retry behaves like a fresh first subscribe (hits the feed again).
        assert!(manager.subscribe("AAPL", SeedOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn list_returns_sorted_active_symbols() {
        let mut feed = MockMarketFeed::new();
        feed.expect_fetch_history().returning(|_, _, _| Ok(vec![]));
        feed.expect_start().returning(|_| Ok(()));

        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        manager.subscribe("msft", SeedOptions::default()).await.unwrap();
        manager.subscribe("AAPL", SeedOptions::default()).await.unwrap();

        assert_eq!(manager.list(), vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(manager.count(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_symbol_is_noop() {
        let feed = MockMarketFeed::new();
        let manager = manager_with(feed, DEFAULT_IDLE_TTL);
        manager.unsubscribe("NVDA");
        assert_eq!(manager.count(), 0);
    }
}
