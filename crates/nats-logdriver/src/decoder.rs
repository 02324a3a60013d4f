// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-source decode loop.
//!
//! Each log source carries a sequence of frames: a 4-byte big-endian length followed by
//! that many bytes of a protobuf [`LogEntry`]. A [`LogConsumer`] reads frames until the
//! stream ends or its cancellation token fires, enriches every record and hands it to the
//! publisher in read order.
//!
//! A framing error (oversize length, truncated frame) is not fatal. The frame reader is
//! rebuilt over the same stream and whatever it had buffered is discarded, so the reader
//! resumes at an arbitrary position and may need several attempts before it lines up with
//! a frame boundary again.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use logdriver_proto::LogEntry;
use prost::Message;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::enricher::Enricher;
use crate::error::FrameError;
use crate::metadata::StreamMetadata;
use crate::publisher::Publisher;

/// A frame declaring this many bytes or more is treated as corrupt.
pub const MAX_FRAME_SIZE: usize = 1_000_000;

const LENGTH_PREFIX_LEN: usize = 4;

/// Splits a byte stream into length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length >= self.max_frame_size {
            return Err(FrameError::Oversize {
                length,
                max: self.max_frame_size,
            });
        }

        let frame_len = LENGTH_PREFIX_LEN + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(length)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                remaining: src.len(),
            }),
        }
    }
}

/// Encodes one record the way the container runtime writes it to a log pipe.
#[must_use]
pub fn encode_frame(entry: &LogEntry) -> Vec<u8> {
    let payload = entry.encode_to_vec();
    // Payloads are bounded well below u32::MAX by MAX_FRAME_SIZE on the read side.
    let length = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Why a decode loop stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The writer closed its end of the stream.
    #[default]
    EndOfStream,
    /// The source was stopped through its cancellation token.
    Stopped,
    /// Reading from the stream failed.
    Failed,
}

/// Counters reported by a decode loop when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub outcome: ConsumeOutcome,
    pub published: u64,
    /// Records that were decoded but could not be published.
    pub dropped: u64,
    /// Frame reader rebuilds after a framing error.
    pub resyncs: u64,
    /// Frames whose payload was not a valid record.
    pub malformed: u64,
}

/// Decode loop of a single log source.
pub struct LogConsumer {
    source_id: String,
    metadata: Arc<StreamMetadata>,
    enricher: Arc<Enricher>,
    publisher: Arc<dyn Publisher>,
    cancel: CancellationToken,
}

impl LogConsumer {
    #[must_use]
    pub fn new(
        source_id: String,
        metadata: Arc<StreamMetadata>,
        enricher: Arc<Enricher>,
        publisher: Arc<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source_id,
            metadata,
            enricher,
            publisher,
            cancel,
        }
    }

    /// Consumes `stream` until it ends, fails or the source is stopped. The stream is
    /// dropped, and so closed, before this returns.
    pub async fn run<R>(self, stream: R) -> ConsumeSummary
    where
        R: AsyncRead + Unpin,
    {
        let mut summary = ConsumeSummary::default();
        let mut frames = FramedRead::new(stream, FrameCodec::new());

        summary.outcome = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break ConsumeOutcome::Stopped,
                next = frames.next() => next,
            };

            match next {
                None => break ConsumeOutcome::EndOfStream,
                Some(Ok(frame)) => self.forward(&frame, &mut summary).await,
                Some(Err(FrameError::Io(e))) => {
                    error!(
                        id = %self.metadata.container_id,
                        file = %self.source_id,
                        "error reading log stream: {e}"
                    );
                    break ConsumeOutcome::Failed;
                }
                Some(Err(e)) => {
                    warn!(
                        id = %self.metadata.container_id,
                        file = %self.source_id,
                        "error reading log message: {e}"
                    );
                    summary.resyncs += 1;
                    frames = FramedRead::new(frames.into_inner(), FrameCodec::new());
                }
            }
        };
        drop(frames);

        info!(
            id = %self.metadata.container_id,
            file = %self.source_id,
            outcome = ?summary.outcome,
            published = summary.published,
            dropped = summary.dropped,
            resyncs = summary.resyncs,
            malformed = summary.malformed,
            "log stream closed"
        );
        summary
    }

    async fn forward(&self, frame: &[u8], summary: &mut ConsumeSummary) {
        let record = match LogEntry::decode(frame) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    id = %self.metadata.container_id,
                    file = %self.source_id,
                    "error decoding log message: {e}"
                );
                summary.malformed += 1;
                return;
            }
        };

        let message = self.enricher.enrich(&record, &self.metadata);
        match self.publisher.publish(&message).await {
            Ok(()) => {
                summary.published += 1;
                debug!(file = %self.source_id, partial = record.is_partial(), "forwarded record");
            }
            Err(e) => {
                error!(
                    id = %self.metadata.container_id,
                    file = %self.source_id,
                    "error publishing log message: {e}"
                );
                summary.dropped += 1;
            }
        }
    }
}
