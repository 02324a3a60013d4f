// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use logdriver_proto::LogEntry;
use nats_logdriver::encode_frame;
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Encodes a stdout record carrying `line`.
pub fn frame(line: &str) -> Vec<u8> {
    encode_frame(&LogEntry {
        source: "stdout".to_string(),
        time_nano: 1_700_000_000_000_000_000,
        line: line.as_bytes().to_vec(),
        ..Default::default()
    })
}

/// Creates a named pipe at `path`.
pub fn make_fifo(path: &Path) {
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::S_IRWXU).expect("failed to create fifo");
}

/// POSTs `body` to the plugin listening on `socket` and returns status and body.
pub async fn post_plugin(
    socket: &Path,
    uri: &str,
    body: &str,
) -> Result<(StatusCode, Bytes), Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), UnixStream::connect(socket)).await??;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = Request::builder()
        .uri(uri)
        .method("POST")
        .header("Host", "plugin")
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))?;

    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}
