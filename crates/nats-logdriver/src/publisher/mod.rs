// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publishing of enriched log messages to the message bus.
//!
//! Delivery is at most once: a message that cannot be sent right away (connection down,
//! serialization failure, send timeout) is reported back as a [`PublishError`] and never
//! retried or buffered by this layer.

use async_trait::async_trait;

use crate::error::PublishError;
use crate::message::PublishableMessage;

pub mod nats;
pub mod state;

pub use nats::{NatsClient, NatsOptions};
pub use state::{ConnectionObserver, ConnectionState, ConnectionStateMachine, LoggingObserver};

pub(crate) const DRIVER_NAME: &str = "nats-log-driver";

/// Sink for enriched log messages, shared by every decode task.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &PublishableMessage) -> Result<(), PublishError>;
}
