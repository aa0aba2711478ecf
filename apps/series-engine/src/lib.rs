#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Series Engine - Market Time-Series Aggregator
//!
//! Ingests trade ticks and raw vendor bars for many (symbol, timeframe)
//! pairs, incrementally builds fixed-interval OHLCV bars, retains a bounded
//! recent history per series, fans out finalized bars and ticks to
//! consumers, and supports reconnect-safe stream resumption via a global
//! sequence cursor and a process epoch marker.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure aggregation core
//!   - `bar`: series types (ticks, raw bars, finalized bars, keys)
//!   - `sequencer`: process-wide monotonic sequence source
//!   - `aggregator`: per-series OHLCV fold state machine
//!   - `buffer`: bounded per-series bar history
//!   - `epoch`: process epoch marker for restart detection
//!   - `freshness`: lexical freshness guard for consumer responses
//!
//! - **Application**: Services and port definitions
//!   - `ports`: the upstream `MarketFeed` collaborator contract
//!   - `services`: aggregation engine, subscription manager, resumable streams
//!
//! - **Infrastructure**: Adapters and process plumbing
//!   - `bus`: in-process topic-keyed event fan-out
//!   - `feed`: simulated fallback source and source selection
//!   - `config`: environment-derived configuration
//!   - `health`: health check HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//! Feed ──► Bar Aggregator (per series) ──► Series Buffer (store)
//!                      │                         │
//!                      └────► Event Bus ◄────────┘ replay
//!                                │                   │
//!                                └──► Stream Session ┴──► consumer
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure aggregation core with no transport dependencies.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and process plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregator::{BarAggregator, IngestError};
pub use domain::bar::{Bar, RawBar, SeriesKey, Tick, Timeframe, TimeframeParseError};
pub use domain::buffer::SeriesBuffer;
pub use domain::epoch::{Epoch, EpochStatus};
pub use domain::freshness::FreshnessGuard;
pub use domain::sequencer::Sequencer;

// Application services
pub use application::ports::{FeedError, FeedEvent, FeedHealth, HealthLevel, MarketFeed};
pub use application::services::engine::{
    AggregationEngine, EngineSettings, LastPrice, SharedEngine,
};
pub use application::services::resume::{
    ResumableStreams, ResumeError, ResumeRequest, StreamSession, parse_cursor,
};
pub use application::services::subscriptions::{
    SeedOptions, SubscribeOutcome, SubscriptionManager, SubscriptionSettings,
};

// Infrastructure
pub use infrastructure::bus::{BusEvent, EventBus, SharedEventBus, SubscriptionToken, Topic};
pub use infrastructure::config::{ConfigError, Credentials, EngineConfig};
pub use infrastructure::feed::{SelectedFeed, SimulatedFeed, SimulatedFeedConfig, select_source};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
