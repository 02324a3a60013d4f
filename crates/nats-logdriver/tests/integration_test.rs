// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::helpers::{frame, make_fifo, post_plugin};
use common::mocks::{DisconnectedPublisher, RecordingPublisher};
use hyper::StatusCode;
use nats_logdriver::{plugin, socket, Enricher, LogDriver, Publisher, StreamRegistry};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Plugin {
    driver: Arc<LogDriver>,
    shutdown: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    _guard: socket::SocketCleanupGuard,
}

impl Plugin {
    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
        self.driver.shutdown().await;
    }
}

fn start_plugin(dir: &Path, publisher: Arc<dyn Publisher>) -> Plugin {
    let enricher = Enricher::with_hostname_resolver(Arc::new(|| Ok("test-host".to_string())));
    let registry = StreamRegistry::new(publisher, Arc::new(enricher));
    let driver = Arc::new(LogDriver::new(registry, dir.join("logs")));

    let socket_path = dir.join("plugin.sock");
    let (listener, guard) = socket::bind(socket_path.to_str().unwrap()).unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(plugin::serve(
        listener,
        Arc::clone(&driver),
        shutdown.clone(),
    ));

    Plugin {
        driver,
        shutdown,
        server,
        _guard: guard,
    }
}

fn start_request(fifo: &Path, container_id: &str) -> String {
    json!({
        "File": fifo,
        "Info": {
            "Config": {"tag": "{{.Name}}/{{.ID}}", "labels": "team"},
            "ContainerID": container_id,
            "ContainerName": "/web",
            "ContainerEntrypoint": "nginx",
            "ContainerArgs": ["-g", "daemon off;"],
            "ContainerImageID": "sha256:4bcdffd70da292293d059d2435c7056711fab2abed8b7a8cb1a6e7f3f9a2f5b6",
            "ContainerImageName": "nginx:latest",
            "ContainerCreated": "2024-03-01T12:00:00.123456789Z",
            "ContainerEnv": null,
            "ContainerLabels": {"team": "edge"},
            "LogPath": "",
            "DaemonName": "docker"
        }
    })
    .to_string()
}

async fn plugin_err(socket: &Path, uri: &str, body: &str) -> String {
    let (status, body) = post_plugin(socket, uri, body).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    value["Err"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_fifo_logs_are_forwarded_until_stop() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("plugin.sock");
    let fifo = dir.path().join("c1.fifo");
    make_fifo(&fifo);

    let publisher = Arc::new(RecordingPublisher::default());
    let plugin = start_plugin(dir.path(), publisher.clone());

    let container_id = "4e2a1c7f0b9d3e5a6c8f1b2d4e6a8c0f2b4d6e8a0c2e4f6a8b0d2f4e6a8c0e2f";
    let err = plugin_err(
        &socket_path,
        "/LogDriver.StartLogging",
        &start_request(&fifo, container_id),
    )
    .await;
    assert_eq!(err, "");
    assert!(plugin.driver.registry().contains(fifo.to_str().unwrap()));
    assert!(dir.path().join("logs").is_dir());

    let mut writer = pipe::OpenOptions::new().open_sender(&fifo).unwrap();
    writer.write_all(&frame("hello")).await.unwrap();
    writer.write_all(&frame("world")).await.unwrap();
    publisher.wait_for(2).await;

    let messages = publisher.messages();
    assert_eq!(publisher.lines(), vec!["hello", "world"]);
    let hello = &messages[0];
    assert_eq!(hello.container_id, container_id);
    assert_eq!(hello.container_name, "/web");
    assert_eq!(hello.image_name, "nginx:latest");
    assert_eq!(hello.command, "nginx -g daemon off;");
    assert_eq!(hello.hostname, "test-host");
    assert_eq!(hello.tag, "web/4e2a1c7f0b9d");
    assert_eq!(
        hello.extra.as_ref().and_then(|extra| extra.get("team")),
        Some(&"edge".to_string())
    );
    assert!(hello.container_created.is_some());

    let err = plugin_err(
        &socket_path,
        "/LogDriver.StopLogging",
        &json!({ "File": fifo }).to_string(),
    )
    .await;
    assert_eq!(err, "");
    assert!(plugin.driver.registry().is_empty());

    let _ = writer.write_all(&frame("after stop")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.lines(), vec!["hello", "world"]);

    plugin.stop().await;
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_duplicate_start_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("plugin.sock");
    let fifo = dir.path().join("c1.fifo");
    make_fifo(&fifo);

    let plugin = start_plugin(dir.path(), Arc::new(RecordingPublisher::default()));
    let request = start_request(&fifo, "c1");

    assert_eq!(
        plugin_err(&socket_path, "/LogDriver.StartLogging", &request).await,
        ""
    );
    let err = plugin_err(&socket_path, "/LogDriver.StartLogging", &request).await;
    assert!(err.contains("already exists"), "unexpected error: {err}");
    assert_eq!(plugin.driver.registry().len(), 1);

    plugin.stop().await;
}

#[tokio::test]
async fn test_writer_close_ends_stream() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("plugin.sock");
    let fifo = dir.path().join("c1.fifo");
    make_fifo(&fifo);

    let publisher = Arc::new(RecordingPublisher::default());
    let plugin = start_plugin(dir.path(), publisher.clone());
    plugin_err(
        &socket_path,
        "/LogDriver.StartLogging",
        &start_request(&fifo, "c1"),
    )
    .await;

    let mut writer = pipe::OpenOptions::new().open_sender(&fifo).unwrap();
    writer.write_all(&frame("bye")).await.unwrap();
    drop(writer);

    publisher.wait_for(1).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !plugin.driver.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("source deregistered after end of stream");

    plugin.stop().await;
}

#[tokio::test]
async fn test_unpublishable_records_do_not_stall_stream() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("plugin.sock");
    let fifo = dir.path().join("c1.fifo");
    make_fifo(&fifo);

    let plugin = start_plugin(dir.path(), Arc::new(DisconnectedPublisher));
    plugin_err(
        &socket_path,
        "/LogDriver.StartLogging",
        &start_request(&fifo, "c1"),
    )
    .await;

    let mut writer = pipe::OpenOptions::new().open_sender(&fifo).unwrap();
    writer.write_all(&frame("lost")).await.unwrap();
    drop(writer);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !plugin.driver.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stream ended despite publish failures");

    plugin.stop().await;
}

#[tokio::test]
async fn test_static_endpoints_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("plugin.sock");
    let plugin = start_plugin(dir.path(), Arc::new(RecordingPublisher::default()));

    let (status, body) = post_plugin(&socket_path, "/Plugin.Activate", "")
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_slice::<Value>(&body).unwrap(),
        json!({"Implements": ["LoggingDriver"]})
    );

    let (_, body) = post_plugin(&socket_path, "/LogDriver.Capabilities", "")
        .await
        .unwrap();
    assert_eq!(
        serde_json::from_slice::<Value>(&body).unwrap(),
        json!({"Err": "", "Cap": {"ReadLogs": false}})
    );

    let (status, body) = post_plugin(
        &socket_path,
        "/LogDriver.ReadLogs",
        r#"{"Info": {"ContainerID": "c1"}, "Config": {"Follow": true}}"#,
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, _) = post_plugin(&socket_path, "/LogDriver.StartLogging", "{")
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    plugin.stop().await;
}
