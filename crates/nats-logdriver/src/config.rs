// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::publisher::nats::{
    NatsOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RECONNECTS, DEFAULT_PUBLISH_TIMEOUT,
    DEFAULT_RECONNECT_WAIT,
};
use crate::socket::DEFAULT_SOCKET_PATH;

pub const DEFAULT_LOG_ROOT: &str = "/var/log/docker";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Plugin configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Bus server URL(s), comma separated
    pub nats_address: String,
    pub nats_subject: String,
    pub max_reconnects: usize,
    pub reconnect_wait: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub tls_required: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub socket_path: String,
    /// Parent directory of the per-container log paths
    pub log_root: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            nats_address: String::new(),
            nats_subject: String::new(),
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            tls_required: false,
            log_level: "info".to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            log_root: PathBuf::from(DEFAULT_LOG_ROOT),
        }
    }
}

impl DriverConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let nats_address =
            env::var("NATS_ADDRESS").map_err(|_| ConfigError::Missing("NATS_ADDRESS"))?;
        let nats_subject =
            env::var("NATS_SUBJECT").map_err(|_| ConfigError::Missing("NATS_SUBJECT"))?;
        let max_reconnects =
            parse_var::<usize>("NATS_MAX_RECONNECT")?.unwrap_or(defaults.max_reconnects);
        let reconnect_wait = parse_var::<u64>("NATS_RECONNECT_WAIT")?
            .map_or(defaults.reconnect_wait, Duration::from_secs);
        let connect_timeout = parse_var::<u64>("NATS_CONNECT_TIMEOUT")?
            .map_or(defaults.connect_timeout, Duration::from_secs);
        let publish_timeout = parse_var::<u64>("NATS_PUBLISH_TIMEOUT")?
            .map_or(defaults.publish_timeout, Duration::from_millis);
        let tls_required =
            parse_var::<bool>("NATS_TLS_REQUIRED")?.unwrap_or(defaults.tls_required);
        let log_level = env::var("LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let socket_path = env::var("PLUGIN_SOCKET").unwrap_or(defaults.socket_path);
        let log_root = env::var("LOG_ROOT").map_or(defaults.log_root, PathBuf::from);

        let config = Self {
            nats_address,
            nats_subject,
            max_reconnects,
            reconnect_wait,
            connect_timeout,
            publish_timeout,
            tls_required,
            log_level,
            socket_path,
            log_root,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nats_address.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "NATS_ADDRESS",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.nats_subject.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "NATS_SUBJECT",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.max_reconnects == 0 {
            return Err(ConfigError::Invalid {
                var: "NATS_MAX_RECONNECT",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "NATS_CONNECT_TIMEOUT",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "NATS_PUBLISH_TIMEOUT",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                var: "LOG_LEVEL",
                reason: format!(
                    "'{}' is not one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn nats_options(&self) -> NatsOptions {
        NatsOptions {
            max_reconnects: self.max_reconnects,
            reconnect_wait: self.reconnect_wait,
            connect_timeout: self.connect_timeout,
            publish_timeout: self.publish_timeout,
            require_tls: self.tls_required,
            ..NatsOptions::new(self.nats_address.clone(), self.nats_subject.clone())
        }
    }
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => val
            .trim()
            .to_lowercase()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("{val:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
