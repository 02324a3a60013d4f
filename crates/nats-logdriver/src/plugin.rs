// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP endpoints of the log driver plugin protocol.
//!
//! The container runtime POSTs JSON requests on the plugin unix socket. Operation failures
//! are reported in the `Err` field of a successful response; only requests that cannot be
//! parsed get an HTTP error status.

use std::fmt::Display;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::http::{self, header, Method, Request, Response, StatusCode};
use hyper::service::service_fn;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::driver::LogDriver;
use crate::metadata::StreamMetadata;
use crate::registry::Capabilities;

pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";
pub const LOG_STREAM_CONTENT_TYPE: &str = "application/x-json-stream";

pub const ACTIVATE_PATH: &str = "/Plugin.Activate";
pub const START_LOGGING_PATH: &str = "/LogDriver.StartLogging";
pub const STOP_LOGGING_PATH: &str = "/LogDriver.StopLogging";
pub const CAPABILITIES_PATH: &str = "/LogDriver.Capabilities";
pub const READ_LOGS_PATH: &str = "/LogDriver.ReadLogs";

pub type PluginResponse = Response<Full<Bytes>>;

#[derive(Debug, Deserialize)]
pub struct StartLoggingRequest {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Info", default)]
    pub info: StreamMetadata,
}

#[derive(Debug, Deserialize)]
pub struct StopLoggingRequest {
    #[serde(rename = "File")]
    pub file: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadConfig {
    #[serde(rename = "Since", default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    #[serde(rename = "Until", default, with = "time::serde::rfc3339::option")]
    pub until: Option<OffsetDateTime>,
    #[serde(rename = "Tail", default)]
    pub tail: i64,
    #[serde(rename = "Follow", default)]
    pub follow: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReadLogsRequest {
    #[serde(rename = "Info", default)]
    pub info: StreamMetadata,
    #[serde(rename = "Config", default)]
    pub config: ReadConfig,
}

#[derive(Debug, Serialize)]
struct ErrResponse {
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct CapabilitiesResponse {
    #[serde(rename = "Err")]
    err: String,
    #[serde(rename = "Cap")]
    cap: Capabilities,
}

#[derive(Debug, Serialize)]
struct ActivateResponse {
    #[serde(rename = "Implements")]
    implements: [&'static str; 1],
}

/// Routes one plugin request to the driver.
pub async fn handle<B>(driver: &LogDriver, req: Request<B>) -> http::Result<PluginResponse>
where
    B: Body,
    B::Error: Display,
{
    let path = req.uri().path().to_string();
    if req.method() != Method::POST {
        return empty(StatusCode::NOT_FOUND);
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return bad_request(&format!("error reading request body: {e}")),
    };

    match path.as_str() {
        ACTIVATE_PATH => json(&ActivateResponse {
            implements: ["LoggingDriver"],
        }),
        START_LOGGING_PATH => {
            let request: StartLoggingRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => return bad_request(&e.to_string()),
            };
            let id = request.info.container_id.clone();
            let result = driver.start_logging(&request.file, request.info).await;
            if let Err(e) = &result {
                error!(id = %id, file = %request.file, "start logging failed: {e}");
            }
            respond_err(result.err())
        }
        STOP_LOGGING_PATH => {
            let request: StopLoggingRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => return bad_request(&e.to_string()),
            };
            respond_err(driver.stop_logging(&request.file).err())
        }
        CAPABILITIES_PATH => json(&CapabilitiesResponse {
            err: String::new(),
            cap: driver.capabilities(),
        }),
        READ_LOGS_PATH => {
            let request: ReadLogsRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => return bad_request(&e.to_string()),
            };
            debug!(
                id = %request.info.container_id,
                follow = request.config.follow,
                "read logs requested, no stored logs to return"
            );
            let stream = driver.read_logs(&request.info).unwrap_or_default();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, LOG_STREAM_CONTENT_TYPE)
                .body(Full::new(Bytes::from(stream)))
        }
        _ => empty(StatusCode::NOT_FOUND),
    }
}

fn respond_err<E: Display>(error: Option<E>) -> http::Result<PluginResponse> {
    json(&ErrResponse {
        err: error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

fn json<T: Serialize>(value: &T) -> http::Result<PluginResponse> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body))),
        Err(e) => {
            error!("error encoding plugin response: {e}");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn bad_request(message: &str) -> http::Result<PluginResponse> {
    debug!("rejecting plugin request: {message}");
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from(message.to_string())))
}

fn empty(status: StatusCode) -> http::Result<PluginResponse> {
    Response::builder().status(status).body(Full::default())
}

/// Serves plugin requests on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: UnixListener,
    driver: Arc<LogDriver>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let service = service_fn(move |req| {
        let driver = Arc::clone(&driver);
        async move { handle(&driver, req).await }
    });

    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();
    info!("plugin listening on {:?}", listener.local_addr()?);

    loop {
        let conn = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("plugin server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("plugin connection handler panicked: {e:?}");
                    }
                }
                continue;
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("plugin connection error: {e}");
            }
        });
    }

    joinset.shutdown().await;
    debug!("plugin server stopped");
    Ok(())
}
