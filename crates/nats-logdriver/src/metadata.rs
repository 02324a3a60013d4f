// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container metadata captured when a log source is started.
//!
//! The container runtime sends this structure as the `Info` object of a start request. It is
//! immutable once the decode task for the source is running; every derived value (tag,
//! extra attributes, command) is recomputed from it on demand.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::TagError;

/// Tag template used when the container does not configure one.
pub const DEFAULT_TAG_TEMPLATE: &str = "{{.ID}}";

const SHORT_ID_LEN: usize = 12;

/// Per-container logging context sent by the container runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Logging options set on the container (`--log-opt`).
    #[serde(rename = "Config", default, deserialize_with = "null_as_default::deserialize")]
    pub config: HashMap<String, String>,
    #[serde(rename = "ContainerID", default, deserialize_with = "null_as_default::deserialize")]
    pub container_id: String,
    #[serde(rename = "ContainerName", default, deserialize_with = "null_as_default::deserialize")]
    pub container_name: String,
    #[serde(
        rename = "ContainerEntrypoint",
        default,
        deserialize_with = "null_as_default::deserialize"
    )]
    pub container_entrypoint: String,
    #[serde(rename = "ContainerArgs", default, deserialize_with = "null_as_default::deserialize")]
    pub container_args: Vec<String>,
    #[serde(
        rename = "ContainerImageID",
        default,
        deserialize_with = "null_as_default::deserialize"
    )]
    pub container_image_id: String,
    #[serde(
        rename = "ContainerImageName",
        default,
        deserialize_with = "null_as_default::deserialize"
    )]
    pub container_image_name: String,
    #[serde(rename = "ContainerCreated", default, with = "time::serde::rfc3339::option")]
    pub container_created: Option<OffsetDateTime>,
    /// Environment of the container as `KEY=value` strings.
    #[serde(rename = "ContainerEnv", default, deserialize_with = "null_as_default::deserialize")]
    pub container_env: Vec<String>,
    #[serde(rename = "ContainerLabels", default, deserialize_with = "null_as_default::deserialize")]
    pub container_labels: HashMap<String, String>,
    #[serde(rename = "LogPath", default, deserialize_with = "null_as_default::deserialize")]
    pub log_path: String,
    #[serde(rename = "DaemonName", default, deserialize_with = "null_as_default::deserialize")]
    pub daemon_name: String,
}

impl StreamMetadata {
    /// Short container id.
    #[must_use]
    pub fn id(&self) -> &str {
        truncate_id(&self.container_id)
    }

    #[must_use]
    pub fn full_id(&self) -> &str {
        &self.container_id
    }

    /// Container name without the leading slash the runtime adds.
    #[must_use]
    pub fn name(&self) -> &str {
        self.container_name.trim_start_matches('/')
    }

    /// Short image id, digest algorithm prefix removed.
    #[must_use]
    pub fn image_id(&self) -> &str {
        truncate_id(&self.container_image_id)
    }

    #[must_use]
    pub fn image_full_id(&self) -> &str {
        &self.container_image_id
    }

    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.container_image_name
    }

    /// Entrypoint and arguments joined by spaces.
    #[must_use]
    pub fn command(&self) -> String {
        std::iter::once(self.container_entrypoint.as_str())
            .chain(self.container_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Renders the configured tag template, falling back to [`DEFAULT_TAG_TEMPLATE`].
    pub fn tag(&self) -> Result<String, TagError> {
        let template = self
            .config
            .get("tag")
            .map(String::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TAG_TEMPLATE);
        render_tag(template, self)
    }

    /// Collects the labels and environment variables selected by the `labels`,
    /// `labels-regex`, `env` and `env-regex` logging options.
    pub fn extra_attributes(&self) -> Result<BTreeMap<String, String>, regex::Error> {
        let mut extra = BTreeMap::new();

        if let Some(labels) = self.option("labels") {
            for key in labels.split(',') {
                if let Some(value) = self.container_labels.get(key) {
                    extra.insert(key.to_string(), value.clone());
                }
            }
        }

        if let Some(pattern) = self.option("labels-regex") {
            let re = Regex::new(pattern)?;
            for (key, value) in &self.container_labels {
                if re.is_match(key) {
                    extra.insert(key.clone(), value.clone());
                }
            }
        }

        let env: HashMap<&str, &str> = self
            .container_env
            .iter()
            .filter_map(|kv| kv.split_once('='))
            .collect();

        if let Some(keys) = self.option("env") {
            for key in keys.split(',') {
                if let Some(value) = env.get(key) {
                    extra.insert(key.to_string(), (*value).to_string());
                }
            }
        }

        if let Some(pattern) = self.option("env-regex") {
            let re = Regex::new(pattern)?;
            for (key, value) in &env {
                if re.is_match(key) {
                    extra.insert((*key).to_string(), (*value).to_string());
                }
            }
        }

        Ok(extra)
    }

    fn option(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "ID" => self.id().to_string(),
            "FullID" | "ContainerID" => self.container_id.clone(),
            "Name" => self.name().to_string(),
            "ContainerName" => self.container_name.clone(),
            "ImageID" => self.image_id().to_string(),
            "ImageFullID" | "ContainerImageID" => self.container_image_id.clone(),
            "ImageName" | "ContainerImageName" => self.container_image_name.clone(),
            "Command" => self.command(),
            "DaemonName" => self.daemon_name.clone(),
            "LogPath" => self.log_path.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Renders a tag template made of literal text and `{{.Field}}` actions.
pub fn render_tag(template: &str, metadata: &StreamMetadata) -> Result<String, TagError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TagError::Unterminated(template.to_string()))?;

        let action = after[..end].trim();
        let field = action
            .strip_prefix('.')
            .filter(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| TagError::Malformed(action.to_string()))?;
        let value = metadata
            .field(field)
            .ok_or_else(|| TagError::UnknownField(field.to_string()))?;
        out.push_str(&value);

        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

fn truncate_id(id: &str) -> &str {
    let id = id.split_once(':').map_or(id, |(_, digest)| digest);
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

// The runtime encodes empty maps and slices as JSON null.
mod null_as_default {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        let opt = Option::<T>::deserialize(deserializer)?;
        Ok(opt.unwrap_or_default())
    }
}
