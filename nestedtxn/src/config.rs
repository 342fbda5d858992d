// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
// Transaction core configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `lock_timeout_ms` (`0` or `none` waits forever)
pub const ENV_LOCK_TIMEOUT_MS: &str = "NESTEDTXN_LOCK_TIMEOUT_MS";
/// Environment variable overriding `deadlock_detection`
pub const ENV_DEADLOCK_DETECTION: &str = "NESTEDTXN_DEADLOCK_DETECTION";
/// Environment variable overriding `max_nesting_depth`
pub const ENV_MAX_NESTING_DEPTH: &str = "NESTEDTXN_MAX_NESTING_DEPTH";

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {variable}")]
    InvalidValue { variable: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for locking and nesting behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Default lock wait in milliseconds; `None` waits until granted or deadlocked
    pub lock_timeout_ms: Option<u64>,

    /// Whether blocked lock requests are checked for wait-for cycles
    pub deadlock_detection: bool,

    /// Maximum number of simultaneously open scopes per context
    pub max_nesting_depth: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: Some(5_000),
            deadlock_detection: true,
            max_nesting_depth: 64,
        }
    }
}

impl CoreConfig {
    /// Lock waits never time out; deadlocks are still detected
    pub fn blocking() -> Self {
        Self {
            lock_timeout_ms: None,
            deadlock_detection: true,
            ..Self::default()
        }
    }

    /// Deadlocks are only broken by lock timeouts
    pub fn timeout_only(timeout_ms: u64) -> Self {
        Self {
            lock_timeout_ms: Some(timeout_ms),
            deadlock_detection: false,
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Default lock wait as a duration
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Defaults overridden by `NESTEDTXN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Override fields from `NESTEDTXN_*` environment variables that are set
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(ENV_LOCK_TIMEOUT_MS) {
            let raw = raw.trim();
            self.lock_timeout_ms = if raw.eq_ignore_ascii_case("none") || raw == "0" {
                None
            } else {
                Some(parse_env(ENV_LOCK_TIMEOUT_MS, raw)?)
            };
        }

        if let Ok(raw) = std::env::var(ENV_DEADLOCK_DETECTION) {
            self.deadlock_detection = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        variable: ENV_DEADLOCK_DETECTION.to_string(),
                        value: raw,
                    })
                }
            };
        }

        if let Ok(raw) = std::env::var(ENV_MAX_NESTING_DEPTH) {
            self.max_nesting_depth = parse_env(ENV_MAX_NESTING_DEPTH, raw.trim())?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would make every transaction fail or hang
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        if self.lock_timeout_ms.is_none() && !self.deadlock_detection {
            return Err(ConfigError::Invalid(
                "deadlock_detection must be enabled when lock waits never time out".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(variable: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        variable: variable.to_string(),
        value: raw.to_string(),
    })
}
