//! Configuration Module
//!
//! Environment-derived configuration for the engine process.

mod settings;

pub use settings::{
    AggregationSettings, ConfigError, Credentials, EngineConfig, ServerSettings,
    SubscriptionLifecycleSettings,
};
