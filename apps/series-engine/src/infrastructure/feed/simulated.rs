//! Simulated Market Feed
//!
//! Random-walk tick source used when the vendor feed is unusable (fatal
//! health check) or the engine is explicitly configured for simulation.
//! Produces plausible ticks and synthetic history so every downstream code
//! path behaves exactly as with live data.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedError, FeedEvent, FeedHealth, MarketFeed};
use crate::domain::bar::{RawBar, Tick, Timeframe};

/// Simulated feed tuning.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedFeedConfig {
    /// Gap between generated ticks per symbol.
    pub tick_interval: Duration,
    /// Price every symbol's walk starts from.
    pub start_price: Decimal,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            start_price: Decimal::from(100),
        }
    }
}

/// Random-walk implementation of the `MarketFeed` port.
pub struct SimulatedFeed {
    config: SimulatedFeedConfig,
    events: mpsc::Sender<FeedEvent>,
    shutdown: CancellationToken,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl SimulatedFeed {
    /// Create a simulated feed delivering events on `events`.
    #[must_use]
    pub fn new(
        config: SimulatedFeedConfig,
        events: mpsc::Sender<FeedEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            events,
            shutdown,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Symbols currently generating ticks.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    fn next_step(price: Decimal) -> (Decimal, u64) {
        let (step_cents, size) = {
            let mut rng = rand::rng();
            (rng.random_range(-25i64..=25), rng.random_range(1u64..=500))
        };
        let stepped = (price + Decimal::new(step_cents, 2)).max(Decimal::new(1, 2));
        (stepped, size)
    }

    async fn run_symbol(
        symbol: String,
        config: SimulatedFeedConfig,
        events: mpsc::Sender<FeedEvent>,
        token: CancellationToken,
    ) {
        let _ = events.send(FeedEvent::Connected).await;
        let mut interval = tokio::time::interval(config.tick_interval);
        let mut price = config.start_price;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let (next_price, size) = Self::next_step(price);
                    price = next_price;
                    let tick = Tick {
                        symbol: symbol.clone(),
                        price,
                        size,
                        ts: Utc::now(),
                    };
                    if events.send(FeedEvent::Tick(tick)).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = events.try_send(FeedEvent::Disconnected);
        tracing::debug!(symbol = %symbol, "Simulated symbol stopped");
    }
}

#[async_trait]
impl MarketFeed for SimulatedFeed {
    async fn health(&self) -> FeedHealth {
        FeedHealth::healthy()
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<RawBar>, FeedError> {
        let width = timeframe.width_ms();
        let last_closed = (Utc::now().timestamp_millis().div_euclid(width) - 1) * width;
        let symbol = symbol.trim().to_uppercase();

        let mut price = self.config.start_price;
        let mut bars = Vec::with_capacity(limit);
        for i in 0..limit {
            let offset = i64::try_from(limit - 1 - i).unwrap_or(0);
            let ts = DateTime::from_timestamp_millis(last_closed - offset * width)
                .unwrap_or_else(Utc::now);

            let open = price;
            let (close, volume) = Self::next_step(open);
            let spread = Decimal::new(5, 2);
            bars.push(RawBar {
                symbol: symbol.clone(),
                ts,
                open,
                high: open.max(close) + spread,
                low: (open.min(close) - spread).max(Decimal::new(1, 2)),
                close,
                volume: Some(volume),
            });
            price = close;
        }
        Ok(bars)
    }

    async fn start(&self, symbol: &str) -> Result<(), FeedError> {
        let symbol = symbol.trim().to_uppercase();
        let token = {
            let mut running = self.running.lock();
            if running.contains_key(&symbol) {
                return Ok(());
            }
            let token = self.shutdown.child_token();
            running.insert(symbol.clone(), token.clone());
            token
        };

        tracing::info!(symbol = %symbol, "Simulated symbol started");
        tokio::spawn(Self::run_symbol(
            symbol,
            self.config,
            self.events.clone(),
            token,
        ));
        Ok(())
    }

    async fn stop(&self, symbol: &str) -> Result<(), FeedError> {
        let symbol = symbol.trim().to_uppercase();
        if let Some(token) = self.running.lock().remove(&symbol) {
            token.cancel();
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_with_channel(interval_ms: u64) -> (SimulatedFeed, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let feed = SimulatedFeed::new(
            SimulatedFeedConfig {
                tick_interval: Duration::from_millis(interval_ms),
                start_price: Decimal::from(100),
            },
            tx,
            CancellationToken::new(),
        );
        (feed, rx)
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (feed, _rx) = feed_with_channel(10);
        assert!(feed.health().await.ok);
    }

    #[tokio::test]
    async fn history_is_bucket_aligned_and_ascending() {
        let (feed, _rx) = feed_with_channel(10);
        let bars = feed.fetch_history("aapl", Timeframe::Min1, 20).await.unwrap();

        assert_eq!(bars.len(), 20);
        for pair in bars.windows(2) {
            assert_eq!(
                pair[1].ts.timestamp_millis() - pair[0].ts.timestamp_millis(),
                Timeframe::Min1.width_ms()
            );
        }
        for bar in &bars {
            assert_eq!(bar.ts.timestamp_millis() % Timeframe::Min1.width_ms(), 0);
            assert_eq!(bar.symbol, "AAPL");
            assert!(bar.low > Decimal::ZERO);
            assert!(bar.high >= bar.low);
        }
    }

    #[tokio::test]
    async fn started_symbol_produces_ticks() {
        let (feed, mut rx) = feed_with_channel(1);
        feed.start("AAPL").await.unwrap();

        let mut ticks = 0;
        while ticks < 3 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap()
            {
                FeedEvent::Tick(tick) => {
                    assert_eq!(tick.symbol, "AAPL");
                    assert!(tick.price > Decimal::ZERO);
                    assert!(tick.size > 0);
                    ticks += 1;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (feed, _rx) = feed_with_channel(1_000);
        feed.start("AAPL").await.unwrap();
        feed.start("aapl").await.unwrap();
        assert_eq!(feed.running_count(), 1);
    }

    #[tokio::test]
    async fn stop_halts_generation() {
        let (feed, mut rx) = feed_with_channel(1);
        feed.start("AAPL").await.unwrap();

        // Wait for at least one tick, then stop.
        loop {
            if let Some(FeedEvent::Tick(_)) = rx.recv().await {
                break;
            }
        }
        feed.stop("AAPL").await.unwrap();
        assert_eq!(feed.running_count(), 0);

        // Drain whatever was in flight; the channel then goes quiet.
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {}
    }
}
