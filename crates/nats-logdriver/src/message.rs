// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A log line enriched with its container context, as published on the bus.
///
/// Field names on the wire are snake case; `extra` is `null` when the extra attributes
/// could not be computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishableMessage {
    pub message: String,
    pub container_id: String,
    pub container_name: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub container_created: Option<OffsetDateTime>,
    pub image_id: String,
    pub image_name: String,
    pub command: String,
    pub hostname: String,
    pub tag: String,
    pub extra: Option<BTreeMap<String, String>>,
}
