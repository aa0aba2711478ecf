//! Domain Layer - Core aggregation types and state machines.
//!
//! This layer contains the pure aggregation core with no transport
//! dependencies: series types, the sequencer, the per-series bar
//! aggregator, the bounded history buffer, the process epoch marker,
//! and the freshness guard.

/// Market series types (ticks, raw bars, finalized bars, series keys).
pub mod bar;

/// Process-wide monotonic sequence source.
pub mod sequencer;

/// Per-series OHLCV aggregation state machine.
pub mod aggregator;

/// Bounded per-series bar history.
pub mod buffer;

/// Process epoch marker for restart detection.
pub mod epoch;

/// Freshness guard for consumer-facing market figures.
pub mod freshness;
