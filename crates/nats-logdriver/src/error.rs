// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use crate::publisher::ConnectionState;

/// Errors returned when admitting or opening a log source
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("logger for {0:?} already exists")]
    AlreadyExists(String),

    #[error("error opening logger fifo {source_id:?}: {error}")]
    Open {
        source_id: String,
        #[source]
        error: io::Error,
    },
}

/// Errors raised while splitting a byte stream into length-prefixed frames
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame declares {length} bytes, limit is {max}")]
    Oversize { length: usize, max: usize },

    #[error("stream ended with {remaining} bytes of an incomplete frame")]
    Truncated { remaining: usize },

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while rendering a tag template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("unterminated action in tag template {0:?}")]
    Unterminated(String),

    #[error("can't evaluate field {0} in tag template")]
    UnknownField(String),

    #[error("malformed action {0:?} in tag template")]
    Malformed(String),
}

/// Errors raised while deriving auxiliary message fields from stream metadata
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("error extracting log tag: {0}")]
    Tag(#[from] TagError),

    #[error("error extracting extra attributes: {0}")]
    Extra(#[from] regex::Error),

    #[error("error resolving hostname: {0}")]
    Hostname(String),
}

/// Errors raised while establishing the message bus connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("NATS servers cannot be empty")]
    MissingAddress,

    #[error("NATS subject cannot be empty")]
    MissingSubject,

    #[error("invalid NATS server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unable to connect to NATS: {0}")]
    Nats(String),
}

/// Errors raised while publishing a single message
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("connection is {0}, message not sent")]
    NotConnected(ConnectionState),

    #[error("unable to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("NATS publish failed: {0}")]
    Nats(String),
}

/// Errors surfaced to the control plane by the driver facade
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("must provide container id in log context")]
    MissingContainerId,

    #[error("error setting up logger dir: {0}")]
    LogDirectory(#[source] io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while reading configuration from the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
