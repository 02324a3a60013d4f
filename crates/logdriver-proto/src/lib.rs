// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Protobuf models for the log records a container runtime writes to a logging plugin.
//!
//! Each record on a log pipe is a `LogEntry` message prefixed by its length as a 4 byte
//! big-endian integer. The message layout mirrors the runtime's `entry.proto`; the types
//! are declared directly with `prost` derives so no `protoc` is needed at build time.

/// A single log line emitted by a container.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    /// Stream the line was read from, usually `stdout` or `stderr`.
    #[prost(string, tag = "1")]
    pub source: ::prost::alloc::string::String,
    /// Unix time of the line in nanoseconds.
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    /// Raw line content without the trailing newline.
    #[prost(bytes = "vec", tag = "3")]
    pub line: ::prost::alloc::vec::Vec<u8>,
    /// Set when the line was split because it exceeded the runtime buffer.
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_log_metadata: ::core::option::Option<PartialLogEntryMetadata>,
}

/// Describes where a partial entry sits within the original line.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartialLogEntryMetadata {
    /// Whether this is the final chunk of the line.
    #[prost(bool, tag = "1")]
    pub last: bool,
    /// Identifier shared by all chunks of the same line.
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    /// Position of this chunk, starting at 1.
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

impl LogEntry {
    /// Returns true when this entry is a continuation chunk rather than a complete line.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.partial
            || self
                .partial_log_metadata
                .as_ref()
                .is_some_and(|meta| !meta.last)
    }
}
