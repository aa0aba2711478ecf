//! Engine Configuration Settings
//!
//! Configuration types for the series engine, loaded from environment
//! variables with typed defaults. The only fatal error class in the whole
//! engine lives here: missing feed credentials in non-simulated mode.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::bar::Timeframe;
use crate::domain::buffer::DEFAULT_CAPACITY;

/// Feed API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Per-series buffer capacity.
    pub buffer_capacity: usize,
    /// Timeframes aggregated for every ingested symbol.
    pub timeframes: Vec<Timeframe>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            timeframes: vec![Timeframe::Min1, Timeframe::Min5, Timeframe::Min15],
        }
    }
}

/// Subscription lifecycle settings.
#[derive(Debug, Clone)]
pub struct SubscriptionLifecycleSettings {
    /// Idle TTL before an unreferenced feed subscription is torn down.
    pub idle_ttl: Duration,
    /// Historical bars seeded per series on first subscribe.
    pub seed_limit: usize,
    /// Interval of the background idle sweep.
    pub sweep_interval: Duration,
}

impl Default for SubscriptionLifecycleSettings {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(300),
            seed_limit: 100,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run against the simulated source instead of a vendor feed.
    pub simulated: bool,
    /// Feed credentials (absent only in simulated mode).
    pub credentials: Option<Credentials>,
    /// Aggregation settings.
    pub aggregation: AggregationSettings,
    /// Subscription lifecycle settings.
    pub subscriptions: SubscriptionLifecycleSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Freshness guard window.
    pub freshness_window: Duration,
    /// Simulated feed tick interval.
    pub sim_tick_interval: Duration,
    /// Symbols subscribed (and watchlist-pinned) at startup.
    pub watch_symbols: Vec<String>,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if feed credentials are missing or empty outside
    /// simulated mode, or if the timeframe list does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let simulated = parse_env_bool("SERIES_ENGINE_SIMULATED", false);

        let credentials = if simulated {
            None
        } else {
            let api_key = require_env("FEED_API_KEY")?;
            let api_secret = require_env("FEED_API_SECRET")?;
            Some(Credentials::new(api_key, api_secret))
        };

        let timeframes = match std::env::var("SERIES_ENGINE_TIMEFRAMES") {
            Ok(raw) => parse_timeframes(&raw)?,
            Err(_) => AggregationSettings::default().timeframes,
        };

        let aggregation = AggregationSettings {
            buffer_capacity: parse_env_usize(
                "SERIES_ENGINE_BUFFER_CAPACITY",
                AggregationSettings::default().buffer_capacity,
            ),
            timeframes,
        };

        let subscriptions = SubscriptionLifecycleSettings {
            idle_ttl: parse_env_duration_secs(
                "SERIES_ENGINE_SUBSCRIPTION_TTL_SECS",
                SubscriptionLifecycleSettings::default().idle_ttl,
            ),
            seed_limit: parse_env_usize(
                "SERIES_ENGINE_SEED_LIMIT",
                SubscriptionLifecycleSettings::default().seed_limit,
            ),
            sweep_interval: parse_env_duration_secs(
                "SERIES_ENGINE_SWEEP_INTERVAL_SECS",
                SubscriptionLifecycleSettings::default().sweep_interval,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                "SERIES_ENGINE_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            simulated,
            credentials,
            aggregation,
            subscriptions,
            server,
            freshness_window: parse_env_duration_millis(
                "SERIES_ENGINE_FRESHNESS_WINDOW_MS",
                Duration::from_secs(3),
            ),
            sim_tick_interval: parse_env_duration_millis(
                "SERIES_ENGINE_SIM_TICK_INTERVAL_MS",
                Duration::from_millis(250),
            ),
            watch_symbols: parse_symbols(
                &std::env::var("SERIES_ENGINE_SYMBOLS").unwrap_or_default(),
            ),
        })
    }
}

/// Configuration error. The only error class the engine treats as fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unparseable value.
    #[error("environment variable {0} has invalid value: {1}")]
    InvalidValue(String, String),
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value =
        std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>, ConfigError> {
    let mut timeframes = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let timeframe = Timeframe::from_str(token).map_err(|_| {
            ConfigError::InvalidValue("SERIES_ENGINE_TIMEFRAMES".to_string(), token.to_string())
        })?;
        if !timeframes.contains(&timeframe) {
            timeframes.push(timeframe);
        }
    }
    if timeframes.is_empty() {
        return Err(ConfigError::EmptyValue(
            "SERIES_ENGINE_TIMEFRAMES".to_string(),
        ));
    }
    Ok(timeframes)
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
