//! Freshness Guard
//!
//! Tracks recency of the last underlying data fetch and flags outgoing text
//! that asserts a concrete market figure without a sufficiently recent
//! fetch. The classifier is an intentionally approximate lexical check: a
//! fixed vocabulary of metric words co-occurring with a numeral, biased
//! toward over-blocking rather than letting unverified numbers through. It
//! is advisory: callers must surface a block as "data unavailable, retry",
//! never silently substitute stale data.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::Regex;

/// Default window within which a fetch counts as fresh.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3);

/// Metric vocabulary for the lexical classifier. A numeral near none of
/// these words is not treated as a market figure.
const METRIC_WORDS: &str =
    "price|vwap|ema|sma|rsi|macd|volume|open|high|low|close|bid|ask|last|change|support|resistance";

#[allow(clippy::expect_used)]
fn metric_word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b(?:{METRIC_WORDS})\b"))
            .expect("static metric vocabulary pattern is valid")
    })
}

#[allow(clippy::expect_used)]
fn numeral_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d").expect("static numeral pattern is valid"))
}

/// Guards consumer-facing responses against citing market figures backed by
/// no recent fetch.
#[derive(Debug)]
pub struct FreshnessGuard {
    window: Duration,
    last_fetch: RwLock<Option<Instant>>,
}

impl FreshnessGuard {
    /// Create a guard with the default freshness window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a guard with a custom freshness window.
    #[must_use]
    pub const fn with_window(window: Duration) -> Self {
        Self {
            window,
            last_fetch: RwLock::new(None),
        }
    }

    /// Record that underlying data was fetched just now.
    pub fn mark_fetched(&self) {
        *self.last_fetch.write() = Some(Instant::now());
    }

    /// Whether the last fetch happened within the freshness window.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.last_fetch
            .read()
            .is_some_and(|at| at.elapsed() <= self.window)
    }

    /// Whether outgoing text should be blocked: it appears to assert a
    /// concrete market figure and the data behind it is not fresh.
    #[must_use]
    pub fn should_block(&self, outgoing_text: &str) -> bool {
        Self::asserts_market_figure(outgoing_text) && !self.is_fresh()
    }

    /// Lexical check: a metric word co-occurring with a numeral anywhere in
    /// the text. Not semantic parsing; over-matching is acceptable.
    #[must_use]
    pub fn asserts_market_figure(text: &str) -> bool {
        metric_word_pattern().is_match(text) && numeral_pattern().is_match(text)
    }
}

impl Default for FreshnessGuard {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("VWAP is 582.10", true; "metric word with numeral")]
    #[test_case("the close was 101", true; "lowercase metric word")]
    #[test_case("RSI: 71.4 looks stretched", true; "indicator with reading")]
    #[test_case("volume spiked today", false; "metric word without numeral")]
    #[test_case("there were 3 sessions this week", false; "numeral without metric word")]
    #[test_case("the market looks quiet", false; "neither")]
    #[test_case("lowest we have seen", false; "metric word only as substring")]
    fn market_figure_classifier(text: &str, expected: bool) {
        assert_eq!(FreshnessGuard::asserts_market_figure(text), expected);
    }

    #[test]
    fn blocks_figure_with_no_recent_fetch() {
        let guard = FreshnessGuard::new();
        assert!(!guard.is_fresh());
        assert!(guard.should_block("VWAP is 582.10"));
    }

    #[test]
    fn allows_figure_right_after_fetch() {
        let guard = FreshnessGuard::new();
        guard.mark_fetched();
        assert!(guard.is_fresh());
        assert!(!guard.should_block("VWAP is 582.10"));
    }

    #[test]
    fn never_blocks_text_without_figures() {
        let guard = FreshnessGuard::new();
        assert!(!guard.should_block("markets are closed for the holiday"));
    }

    #[test]
    fn freshness_expires_after_window() {
        let guard = FreshnessGuard::with_window(Duration::ZERO);
        guard.mark_fetched();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!guard.is_fresh());
        assert!(guard.should_block("price now 42.50"));
    }
}
