//! In-Process Event Bus
//!
//! Topic-keyed fan-out of finalized bars and ticks to any number of
//! subscribers. Delivery is synchronous, in registration order, with no
//! buffering at the bus; buffering is the series buffer's job. Each
//! handler invocation is independently guarded: a failing handler is
//! reported and skipped, never allowed to abort the fan-out.
//!
//! Handlers run on the publisher's thread and must be fast; long-running
//! consumers (stream sessions) dispatch into their own queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::bar::{Bar, SeriesKey, Tick, Timeframe};

// =============================================================================
// Topics and Events
// =============================================================================

/// Composite subscription key.
///
/// Finalized bars are keyed by (symbol, timeframe); ticks are keyed by
/// symbol alone: a tick has no timeframe of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A newly finalized bar for one series.
    BarNew {
        /// Normalized instrument symbol.
        symbol: String,
        /// Series timeframe.
        timeframe: Timeframe,
    },
    /// A live trade tick for one symbol.
    Tick {
        /// Normalized instrument symbol.
        symbol: String,
    },
}

impl Topic {
    /// Topic for finalized bars of one series.
    #[must_use]
    pub fn bar_new(symbol: &str, timeframe: Timeframe) -> Self {
        Self::BarNew {
            symbol: symbol.trim().to_uppercase(),
            timeframe,
        }
    }

    /// Topic for ticks of one symbol.
    #[must_use]
    pub fn tick(symbol: &str) -> Self {
        Self::Tick {
            symbol: symbol.trim().to_uppercase(),
        }
    }

    /// Topic a finalized bar publishes on.
    #[must_use]
    pub fn for_bar(key: &SeriesKey) -> Self {
        Self::BarNew {
            symbol: key.symbol().to_string(),
            timeframe: key.timeframe(),
        }
    }
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A newly finalized bar.
    BarFinalized(Bar),
    /// A live trade tick.
    Tick(Tick),
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Handle returned by `subscribe`, used to remove a single handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Subscriber callback. Returning `Err` reports a delivery failure for this
/// handler only; remaining handlers still receive the publish.
pub type BusHandler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    token: SubscriptionToken,
    handler: BusHandler,
}

#[derive(Default)]
struct Registry {
    by_topic: HashMap<Topic, Vec<Subscriber>>,
    topic_of: HashMap<SubscriptionToken, Topic>,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Publish/subscribe fan-out keyed by [`Topic`].
///
/// Subscribers registered after a publish do not receive it; there is no
/// replay at the bus level.
pub struct EventBus {
    registry: RwLock<Registry>,
    next_token: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a handler for a topic. Handlers for one topic are invoked
    /// in registration order.
    pub fn subscribe(&self, topic: Topic, handler: BusHandler) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.write();
        registry
            .by_topic
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { token, handler });
        registry.topic_of.insert(token, topic);
        token
    }

    /// Remove a single handler. Unknown tokens are a no-op.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut registry = self.registry.write();
        let Some(topic) = registry.topic_of.remove(&token) else {
            return;
        };
        if let Some(subscribers) = registry.by_topic.get_mut(&topic) {
            subscribers.retain(|s| s.token != token);
            if subscribers.is_empty() {
                registry.by_topic.remove(&topic);
            }
        }
    }

    /// Deliver an event to all current subscribers of the exact topic.
    ///
    /// Returns the number of handlers invoked. Handler failures are logged
    /// per handler and do not abort delivery to the rest.
    pub fn publish(&self, topic: &Topic, event: &BusEvent) -> usize {
        // Snapshot handlers so slow subscribers never hold the registry
        // lock against other series' publishes.
        let handlers: Vec<(SubscriptionToken, BusHandler)> = {
            let registry = self.registry.read();
            registry.by_topic.get(topic).map_or_else(Vec::new, |subs| {
                subs.iter()
                    .map(|s| (s.token, Arc::clone(&s.handler)))
                    .collect()
            })
        };

        let delivered = handlers.len();
        for (token, handler) in handlers {
            if let Err(error) = handler(event) {
                tracing::warn!(?topic, token = token.0, %error, "Bus handler failed");
            }
        }
        delivered
    }

    /// Number of handlers currently registered for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .read()
            .by_topic
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Total handlers registered across all topics.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.registry.read().topic_of.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared bus reference.
pub type SharedEventBus = Arc<EventBus>;

// =============================================================================
// Tests
// =============================================================================
