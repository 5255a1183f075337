//! Terminal settings.
//!
//! Defaults are built in; an optional TOML file and `TILL_*` environment
//! variables (nested keys separated by `__`, e.g. `TILL_POLL__MAX_WAIT_MS`)
//! override them in that order.

use crate::error::{CheckoutError, Result};
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "TILL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TillConfig {
    /// Prefix printed in front of amounts.
    pub currency: String,
    /// Replaces the leading zero of local phone numbers.
    pub country_code: String,
    pub log_level: String,
    pub poll: PollConfig,
}

impl Default for TillConfig {
    fn default() -> Self {
        Self {
            currency: "KSh".to_string(),
            country_code: "254".to_string(),
            log_level: "info".to_string(),
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub max_wait_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_interval_ms: 15_000,
            backoff_multiplier: 1.5,
            max_wait_ms: 120_000,
        }
    }
}

impl TillConfig {
    /// Loads settings from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: Self = builder.build()?.try_deserialize()?;
        config.poll.validate()?;
        Ok(config)
    }
}

impl PollConfig {
    /// Rejects timings the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| CheckoutError::from(::config::ConfigError::Message(message));
        if self.interval_ms == 0 {
            return Err(invalid("poll.interval_ms must be greater than 0".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(format!(
                "poll.backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}
