// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::unix::pipe;
use tracing::debug;

use crate::error::{DriverError, RegistryError};
use crate::metadata::StreamMetadata;
use crate::registry::{Capabilities, StreamRegistry};

/// Log driver operations invoked by the container runtime, backed by named pipes.
pub struct LogDriver {
    registry: StreamRegistry,
    log_root: PathBuf,
}

impl LogDriver {
    #[must_use]
    pub fn new(registry: StreamRegistry, log_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            log_root: log_root.into(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Starts forwarding the logs written to the fifo at `file`.
    pub async fn start_logging(
        &self,
        file: &str,
        mut info: StreamMetadata,
    ) -> Result<(), DriverError> {
        if info.container_id.is_empty() {
            return Err(DriverError::MissingContainerId);
        }

        // A duplicate start must fail before touching the filesystem.
        if self.registry.contains(file) {
            return Err(RegistryError::AlreadyExists(file.to_string()).into());
        }

        if info.log_path.is_empty() {
            info.log_path = self
                .log_root
                .join(&info.container_id)
                .to_string_lossy()
                .into_owned();
        }
        if let Some(dir) = Path::new(&info.log_path).parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(DriverError::LogDirectory)?;
        }

        debug!(id = %info.container_id, file, log_path = %info.log_path, "opening log fifo");
        let path = PathBuf::from(file);
        self.registry.start(file, info, move || open_fifo(&path))?;
        Ok(())
    }

    /// Stops forwarding the logs of `file`. Unknown files are ignored.
    pub fn stop_logging(&self, file: &str) -> Result<(), DriverError> {
        self.registry.stop(file);
        Ok(())
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        StreamRegistry::capabilities()
    }

    /// Log read-back is not supported: there is never a stream of past entries.
    #[must_use]
    pub fn read_logs(&self, _info: &StreamMetadata) -> Option<Vec<u8>> {
        None
    }

    pub async fn shutdown(&self) {
        let summaries = self.registry.shutdown().await;
        debug!(streams = summaries.len(), "log driver stopped");
    }
}

fn open_fifo(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().open_receiver(path)
}
