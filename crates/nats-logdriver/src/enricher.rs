// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw log records into publishable messages.
//!
//! The log line and the container identity fields are always carried over. Tag, extra
//! attributes and hostname are auxiliary: when one of them cannot be computed the field is
//! left empty, the failure is logged, and the message is still produced.

use std::fmt;
use std::sync::Arc;

use logdriver_proto::LogEntry;
use tracing::error;

use crate::error::EnrichError;
use crate::message::PublishableMessage;
use crate::metadata::StreamMetadata;

pub type HostnameResolverFn = Arc<dyn Fn() -> Result<String, EnrichError> + Send + Sync>;

/// Builds [`PublishableMessage`]s from [`LogEntry`] records and their stream metadata.
#[derive(Clone)]
pub struct Enricher {
    hostname_resolver: HostnameResolverFn,
}

impl Enricher {
    /// Creates an enricher resolving the hostname from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hostname_resolver(Arc::new(system_hostname))
    }

    #[must_use]
    pub fn with_hostname_resolver(hostname_resolver: HostnameResolverFn) -> Self {
        Self { hostname_resolver }
    }

    /// Enriches one record. Never fails; see the module documentation.
    #[must_use]
    pub fn enrich(&self, record: &LogEntry, metadata: &StreamMetadata) -> PublishableMessage {
        let mut message = PublishableMessage {
            message: String::from_utf8_lossy(&record.line).into_owned(),
            container_id: metadata.container_id.clone(),
            container_name: metadata.container_name.clone(),
            container_created: metadata.container_created,
            image_id: metadata.container_image_id.clone(),
            image_name: metadata.container_image_name.clone(),
            command: metadata.command(),
            ..Default::default()
        };

        match metadata.tag() {
            Ok(tag) => message.tag = tag,
            Err(e) => report(metadata, &EnrichError::from(e)),
        }

        match metadata.extra_attributes() {
            Ok(extra) => message.extra = Some(extra),
            Err(e) => report(metadata, &EnrichError::from(e)),
        }

        match (self.hostname_resolver)() {
            Ok(hostname) => message.hostname = hostname,
            Err(e) => report(metadata, &e),
        }

        message
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Enricher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Enricher")
    }
}

fn report(metadata: &StreamMetadata, error: &EnrichError) {
    error!(id = %metadata.container_id, "{error}");
}

/// Reads the hostname of the machine running the plugin.
pub fn system_hostname() -> Result<String, EnrichError> {
    let hostname = nix::unistd::gethostname().map_err(|e| EnrichError::Hostname(e.to_string()))?;
    hostname
        .into_string()
        .map_err(|raw| EnrichError::Hostname(format!("hostname is not valid UTF-8: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn fixed_hostname() -> Enricher {
        Enricher::with_hostname_resolver(Arc::new(|| Ok("node-7".to_string())))
    }

    fn failing_hostname() -> Enricher {
        Enricher::with_hostname_resolver(Arc::new(|| {
            Err(EnrichError::Hostname("no hostname".to_string()))
        }))
    }

    fn record(line: &[u8]) -> LogEntry {
        LogEntry {
            line: line.to_vec(),
            source: "stdout".to_string(),
            ..Default::default()
        }
    }

    fn metadata() -> StreamMetadata {
        StreamMetadata {
            container_id: "c1".to_string(),
            container_name: "/web".to_string(),
            container_image_id: "sha256:abc".to_string(),
            container_image_name: "nginx".to_string(),
            container_entrypoint: "nginx".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_enrich_copies_fields() {
        let message = fixed_hostname().enrich(&record(b"hello"), &metadata());

        assert_eq!(message.message, "hello");
        assert_eq!(message.container_id, "c1");
        assert_eq!(message.container_name, "/web");
        assert_eq!(message.image_id, "sha256:abc");
        assert_eq!(message.image_name, "nginx");
        assert_eq!(message.command, "nginx");
        assert_eq!(message.hostname, "node-7");
        assert_eq!(message.tag, "c1");
        assert_eq!(message.extra, Some(Default::default()));
    }

    #[test]
    fn test_enrich_keeps_invalid_utf8_line() {
        let message = fixed_hostname().enrich(&record(&[b'o', b'k', 0xff]), &metadata());
        assert_eq!(message.message, "ok\u{fffd}");
    }

    #[test]
    #[traced_test]
    fn test_enrich_degrades_when_metadata_fails() {
        let mut info = metadata();
        info.config
            .insert("tag".to_string(), "{{.Missing}}".to_string());
        info.config
            .insert("labels-regex".to_string(), "[".to_string());

        let message = failing_hostname().enrich(&record(b"still here"), &info);

        assert_eq!(message.message, "still here");
        assert_eq!(message.container_id, "c1");
        assert_eq!(message.container_name, "/web");
        assert!(message.tag.is_empty());
        assert!(message.extra.is_none());
        assert!(message.hostname.is_empty());

        assert!(logs_contain("error extracting log tag"));
        assert!(logs_contain("error extracting extra attributes"));
        assert!(logs_contain("error resolving hostname"));
    }

    #[test]
    fn test_system_hostname_resolves() {
        let hostname = system_hostname().expect("hostname available in test environment");
        assert!(!hostname.is_empty());
    }
}
