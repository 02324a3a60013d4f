// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container log forwarding to a NATS message bus.
//!
//! The container runtime hands every container's output to the plugin as a named pipe of
//! length-prefixed protobuf records. [`StreamRegistry`] runs one decode task per pipe;
//! each record is enriched with the container metadata and published as JSON on a single
//! subject through a [`Publisher`].

pub mod config;
pub mod decoder;
pub mod driver;
pub mod enricher;
pub mod error;
pub mod message;
pub mod metadata;
pub mod plugin;
pub mod publisher;
pub mod registry;
pub mod socket;

pub use config::DriverConfig;
pub use decoder::{encode_frame, ConsumeOutcome, ConsumeSummary, LogConsumer, MAX_FRAME_SIZE};
pub use driver::LogDriver;
pub use enricher::Enricher;
pub use message::PublishableMessage;
pub use metadata::StreamMetadata;
pub use publisher::{NatsClient, NatsOptions, Publisher};
pub use registry::{Capabilities, StreamRegistry};
