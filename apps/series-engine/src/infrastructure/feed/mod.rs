//! Feed Adapters
//!
//! Concrete sources behind the `MarketFeed` port. The vendor feed itself is
//! an external collaborator wired in at deployment; in-tree lives the
//! simulated fallback source and the health-gated source selection policy.

mod simulated;

use std::sync::Arc;

pub use simulated::{SimulatedFeed, SimulatedFeedConfig};

use crate::application::ports::MarketFeed;

/// Outcome of health-gating the primary feed.
pub struct SelectedFeed {
    /// The source ingestion should use.
    pub feed: Arc<dyn MarketFeed>,
    /// Whether the engine is running in a degraded or fallback mode.
    pub degraded: bool,
    /// Vendor-supplied reason, when degraded.
    pub reason: Option<String>,
}

/// Pick the ingestion source from the primary feed's health check.
///
/// A fatal health result means "do not ingest from this feed": the
/// simulated fallback is used instead. A warn result keeps the primary but
/// reports degraded. Neither outcome is fatal to the process.
pub async fn select_source(
    primary: Arc<dyn MarketFeed>,
    fallback: Arc<dyn MarketFeed>,
) -> SelectedFeed {
    let health = primary.health().await;

    if health.ok {
        return SelectedFeed {
            feed: primary,
            degraded: false,
            reason: None,
        };
    }

    if health.is_fatal() {
        tracing::error!(
            reason = health.reason.as_deref().unwrap_or("unspecified"),
            "Primary feed unusable, falling back to simulated source"
        );
        return SelectedFeed {
            feed: fallback,
            degraded: true,
            reason: health.reason,
        };
    }

    tracing::warn!(
        reason = health.reason.as_deref().unwrap_or("unspecified"),
        "Primary feed degraded, ingesting anyway"
    );
    SelectedFeed {
        feed: primary,
        degraded: true,
        reason: health.reason,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::application::ports::{FeedHealth, MockMarketFeed};

    use super::*;

    fn mock_with_health(health: FeedHealth) -> Arc<dyn MarketFeed> {
        let mut feed = MockMarketFeed::new();
        feed.expect_health().returning(move || health.clone());
        Arc::new(feed)
    }

    #[tokio::test]
    async fn healthy_primary_is_kept() {
        let primary = mock_with_health(FeedHealth::healthy());
        let fallback = Arc::new(MockMarketFeed::new());

        let selected = select_source(primary, fallback).await;
        assert!(!selected.degraded);
        assert!(selected.reason.is_none());
    }

    #[tokio::test]
    async fn fatal_primary_falls_back_to_simulated() {
        let primary = mock_with_health(FeedHealth::fatal("bad credentials".to_string()));
        let fallback = mock_with_health(FeedHealth::healthy());

        let selected = select_source(primary, Arc::clone(&fallback)).await;
        assert!(selected.degraded);
        assert_eq!(selected.reason.as_deref(), Some("bad credentials"));
        // The fallback is the selected source.
        assert!(selected.feed.health().await.ok);
    }

    #[tokio::test]
    async fn warn_primary_ingests_degraded() {
        let primary = mock_with_health(FeedHealth::degraded("stale token".to_string()));
        let fallback = Arc::new(MockMarketFeed::new());

        let selected = select_source(primary, fallback).await;
        assert!(selected.degraded);
        assert_eq!(selected.reason.as_deref(), Some("stale token"));
    }
}
