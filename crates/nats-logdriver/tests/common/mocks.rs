// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publishers standing in for the message bus

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nats_logdriver::error::PublishError;
use nats_logdriver::publisher::ConnectionState;
use nats_logdriver::{PublishableMessage, Publisher};

/// Records every published message.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishableMessage>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<PublishableMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.message).collect()
    }

    /// Waits until at least `count` messages were published, panicking after 5 seconds.
    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.messages.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} messages, got {:?}", self.lines()));
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: &PublishableMessage) -> Result<(), PublishError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Behaves like a publisher whose connection is down.
pub struct DisconnectedPublisher;

#[async_trait]
impl Publisher for DisconnectedPublisher {
    async fn publish(&self, _message: &PublishableMessage) -> Result<(), PublishError> {
        Err(PublishError::NotConnected(ConnectionState::Reconnecting {
            attempts: 1,
        }))
    }
}
