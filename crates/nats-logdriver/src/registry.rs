// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of the active log sources.
//!
//! At most one decode task runs per source id. The map is the only state shared between
//! callers; its lock guards lookups, insertions and removals and is never held while a
//! stream is opened or a task is awaited.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::decoder::{ConsumeOutcome, ConsumeSummary, LogConsumer};
use crate::enricher::Enricher;
use crate::error::RegistryError;
use crate::metadata::StreamMetadata;
use crate::publisher::Publisher;

/// Features advertised to the container runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "ReadLogs")]
    pub read_logs: bool,
}

struct ActiveStream {
    metadata: Arc<StreamMetadata>,
    cancel: CancellationToken,
    generation: u64,
    task: Option<JoinHandle<ConsumeSummary>>,
}

type StreamMap = Mutex<HashMap<String, ActiveStream>>;

fn lock(streams: &StreamMap) -> MutexGuard<'_, HashMap<String, ActiveStream>> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lets a finished task remove its own entry, unless a newer start replaced it.
struct Registration {
    streams: Weak<StreamMap>,
    source_id: String,
    generation: u64,
}

impl Registration {
    fn release(self) {
        let Some(streams) = self.streams.upgrade() else {
            return;
        };
        let mut streams = lock(&streams);
        if streams
            .get(&self.source_id)
            .is_some_and(|active| active.generation == self.generation)
        {
            streams.remove(&self.source_id);
        }
    }
}

pub struct StreamRegistry {
    streams: Arc<StreamMap>,
    next_generation: AtomicU64,
    publisher: Arc<dyn Publisher>,
    enricher: Arc<Enricher>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>, enricher: Arc<Enricher>) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            publisher,
            enricher,
        }
    }

    /// Admits `source_id`, opens its stream with `open` and spawns the decode task.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] without calling `open` when the source is
    /// already active. When `open` fails nothing stays registered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, F>(
        &self,
        source_id: &str,
        metadata: StreamMetadata,
        open: F,
    ) -> Result<(), RegistryError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnOnce() -> io::Result<R>,
    {
        let metadata = Arc::new(metadata);
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut streams = lock(&self.streams);
            if streams.contains_key(source_id) {
                return Err(RegistryError::AlreadyExists(source_id.to_string()));
            }
            streams.insert(
                source_id.to_string(),
                ActiveStream {
                    metadata: Arc::clone(&metadata),
                    cancel: cancel.clone(),
                    generation,
                    task: None,
                },
            );
        }

        let stream = match open() {
            Ok(stream) => stream,
            Err(error) => {
                Registration {
                    streams: Arc::downgrade(&self.streams),
                    source_id: source_id.to_string(),
                    generation,
                }
                .release();
                return Err(RegistryError::Open {
                    source_id: source_id.to_string(),
                    error,
                });
            }
        };

        info!(id = %metadata.container_id, file = %source_id, "start logging");

        let registration = Registration {
            streams: Arc::downgrade(&self.streams),
            source_id: source_id.to_string(),
            generation,
        };
        let consumer = LogConsumer::new(
            source_id.to_string(),
            metadata,
            Arc::clone(&self.enricher),
            Arc::clone(&self.publisher),
            cancel,
        );
        let task = tokio::spawn(async move {
            let summary = consumer.run(stream).await;
            registration.release();
            summary
        });

        // The entry may already be gone if the source was stopped or finished meanwhile.
        if let Some(active) = lock(&self.streams)
            .get_mut(source_id)
            .filter(|active| active.generation == generation)
        {
            active.task = Some(task);
        }

        Ok(())
    }

    /// Stops the decode task of `source_id` and forgets it.
    ///
    /// Stopping an unknown source is not an error. Returns whether a source was active.
    pub fn stop(&self, source_id: &str) -> bool {
        let removed = lock(&self.streams).remove(source_id);
        match removed {
            Some(active) => {
                active.cancel.cancel();
                info!(id = %active.metadata.container_id, file = %source_id, "stop logging");
                true
            }
            None => {
                debug!(file = %source_id, "stop requested for unknown source");
                false
            }
        }
    }

    /// Stops every active source and waits for the decode tasks to exit.
    pub async fn shutdown(&self) -> Vec<ConsumeSummary> {
        let drained: Vec<(String, ActiveStream)> = lock(&self.streams).drain().collect();

        for (_, active) in &drained {
            active.cancel.cancel();
        }

        let mut summaries = Vec::with_capacity(drained.len());
        for (source_id, active) in drained {
            let Some(task) = active.task else {
                continue;
            };
            match task.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(file = %source_id, "decode task failed: {e}");
                    summaries.push(ConsumeSummary {
                        outcome: ConsumeOutcome::Failed,
                        ..Default::default()
                    });
                }
            }
        }
        summaries
    }

    #[must_use]
    pub fn active_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = lock(&self.streams).keys().cloned().collect();
        sources.sort();
        sources
    }

    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        lock(&self.streams).contains_key(source_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.streams).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capabilities() -> Capabilities {
        Capabilities { read_logs: false }
    }
}
