//! Run configuration (layered: code > env > TOML file > defaults).

use std::path::Path;
use std::str::FromStr;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::RunwireError;

pub const ENV_MAX_FOLLOW_UPS: &str = "RUNWIRE_MAX_FOLLOW_UPS";
pub const ENV_DISPATCH_MODE: &str = "RUNWIRE_DISPATCH_MODE";
pub const ENV_INTERRUPTION_MESSAGE: &str = "RUNWIRE_INTERRUPTION_MESSAGE";
pub const ENV_STREAM_IDLE_TIMEOUT_MS: &str = "RUNWIRE_STREAM_IDLE_TIMEOUT_MS";

/// How local tool calls sealed in the same run are scheduled.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DispatchMode {
    /// One handler at a time, in sealed order.
    #[default]
    Sequential,
    /// Every handler starts as soon as its call seals.
    Concurrent,
}

/// Knobs for [`RunLoop`](crate::agent_loop::RunLoop).
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Automatic follow-up sub-runs allowed per user turn.
    #[builder(default = 1)]
    pub max_follow_ups: usize,
    #[builder(default)]
    pub dispatch_mode: DispatchMode,
    /// Replaces the finalizer's default text for interrupted runs.
    #[builder(into)]
    pub interruption_message: Option<String>,
    /// Fail the backend stream after this long without an event.
    pub stream_idle_timeout_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, RunwireError> {
        toml::from_str(source)
            .map_err(|e| RunwireError::Configuration(format!("invalid run config: {e}")))
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RunwireError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RunwireError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Defaults overlaid with `RUNWIRE_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self, RunwireError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, RunwireError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `RUNWIRE_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), RunwireError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        if let Some(value) = env_var(ENV_MAX_FOLLOW_UPS) {
            self.max_follow_ups = parse_env(ENV_MAX_FOLLOW_UPS, &value)?;
        }
        if let Some(value) = env_var(ENV_DISPATCH_MODE) {
            self.dispatch_mode = parse_env(ENV_DISPATCH_MODE, &value)?;
        }
        if let Some(value) = env_var(ENV_INTERRUPTION_MESSAGE) {
            self.interruption_message = Some(value);
        }
        if let Some(value) = env_var(ENV_STREAM_IDLE_TIMEOUT_MS) {
            let timeout: u64 = parse_env(ENV_STREAM_IDLE_TIMEOUT_MS, &value)?;
            self.stream_idle_timeout_ms = (timeout > 0).then_some(timeout);
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, RunwireError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RunwireError::Configuration(format!("{key}={value:?}: {e}")))
}
