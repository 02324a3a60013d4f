// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_nats::{ClientError, ConnectOptions, Event, ServerAddr};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, trace, warn};

use crate::error::{ConnectError, PublishError};
use crate::message::PublishableMessage;
use crate::publisher::state::{
    ConnectionObserver, ConnectionState, ConnectionStateMachine, LoggingObserver,
};
use crate::publisher::{Publisher, DRIVER_NAME};

pub const DEFAULT_MAX_RECONNECTS: usize = 10;
pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings for [`NatsClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsOptions {
    /// One or more server URLs, comma separated.
    pub address: String,
    pub subject: String,
    pub max_reconnects: usize,
    pub reconnect_wait: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on how long a single publish may block.
    pub publish_timeout: Duration,
    /// Refuse plain text connections instead of using TLS only when the server offers it.
    pub require_tls: bool,
}

impl NatsOptions {
    #[must_use]
    pub fn new(address: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            subject: subject.into(),
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            require_tls: false,
        }
    }

    /// Checks the settings and parses the server list without touching the network.
    pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, ConnectError> {
        if self.address.trim().is_empty() {
            return Err(ConnectError::MissingAddress);
        }
        if self.subject.trim().is_empty() {
            return Err(ConnectError::MissingSubject);
        }

        let addrs = self
            .address
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                addr.parse::<ServerAddr>()
                    .map_err(|e| ConnectError::InvalidAddress {
                        address: addr.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if addrs.is_empty() {
            return Err(ConnectError::MissingAddress);
        }
        Ok(addrs)
    }
}

/// Publish client holding one persistent connection to the bus.
///
/// The underlying client reconnects on its own; connection events drive a
/// [`ConnectionStateMachine`] and `publish` refuses to send unless it is `Connected`.
pub struct NatsClient {
    client: Mutex<Option<async_nats::Client>>,
    subject: String,
    publish_timeout: Duration,
    state: Arc<ConnectionStateMachine>,
}

impl NatsClient {
    pub async fn connect(options: NatsOptions) -> Result<Self, ConnectError> {
        Self::connect_with_observer(options, Arc::new(LoggingObserver)).await
    }

    pub async fn connect_with_observer(
        options: NatsOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Self, ConnectError> {
        let addrs = options.server_addrs()?;

        let state = Arc::new(ConnectionStateMachine::new(
            options.max_reconnects,
            observer,
        ));
        state.connecting();

        let events = Arc::clone(&state);
        let attempts = Arc::clone(&state);
        let reconnect_wait = options.reconnect_wait;

        let connected = ConnectOptions::new()
            .name(DRIVER_NAME)
            .connection_timeout(options.connect_timeout)
            .max_reconnects(options.max_reconnects)
            .require_tls(options.require_tls)
            // The client counts the initial connect as attempt 1 too; only reconnects wait.
            .reconnect_delay_callback(move |attempt| {
                if attempts.current() == ConnectionState::Connecting {
                    return Duration::ZERO;
                }
                attempts.reconnect_attempt(attempt);
                reconnect_wait
            })
            .event_callback(move |event| {
                let state = Arc::clone(&events);
                async move { apply_event(&state, event) }
            })
            .connect(addrs)
            .await;

        let client = match connected {
            Ok(client) => client,
            Err(e) => {
                state.disconnected();
                return Err(ConnectError::Nats(e.to_string()));
            }
        };
        state.connected();

        info!(
            driver = DRIVER_NAME,
            "nats: connected to {:?}, status: {}",
            options.address,
            state.current()
        );

        Ok(Self {
            client: Mutex::new(Some(client)),
            subject: options.subject,
            publish_timeout: options.publish_timeout,
            state,
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Flushes pending messages and closes the connection. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(client) = client else {
            return Ok(());
        };

        info!(driver = DRIVER_NAME, "nats: broker disconnecting");
        let flushed = if self.state.is_connected() {
            match timeout(self.publish_timeout, client.flush()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ConnectError::Nats(e.to_string())),
                Err(_) => Err(ConnectError::Nats(format!(
                    "flush timed out after {:?}",
                    self.publish_timeout
                ))),
            }
        } else {
            Ok(())
        };
        self.state.closed();
        drop(client);

        flushed
    }

    fn current_client(&self) -> Option<async_nats::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Publisher for NatsClient {
    async fn publish(&self, message: &PublishableMessage) -> Result<(), PublishError> {
        let state = self.state.current();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected(state));
        }
        let client = self
            .current_client()
            .ok_or(PublishError::NotConnected(ConnectionState::Closed))?;

        let payload = serde_json::to_vec(message)?;
        trace!(driver = DRIVER_NAME, "send to nats: {:?}", message);

        match timeout(
            self.publish_timeout,
            client.publish(self.subject.clone(), payload.into()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Nats(e.to_string())),
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        }
    }
}

fn apply_event(state: &ConnectionStateMachine, event: Event) {
    match event {
        Event::Connected => {
            state.connected();
        }
        Event::Disconnected => {
            state.disconnected();
        }
        Event::Closed | Event::ClientError(ClientError::MaxReconnects) => {
            state.closed();
        }
        other => warn!(driver = DRIVER_NAME, "nats: {other}"),
    }
}
