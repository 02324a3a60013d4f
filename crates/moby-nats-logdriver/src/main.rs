// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use nats_logdriver::{
    plugin, socket, DriverConfig, Enricher, LogDriver, NatsClient, StreamRegistry,
};

/// Container runtime logging plugin forwarding container logs to NATS.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {}

#[tokio::main]
pub async fn main() -> ExitCode {
    let _args = Args::parse();

    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    init_logging(&log_level);

    let config = match DriverConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("configuration loaded: {config:?}");

    let client = match NatsClient::connect(config.nats_options()).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let registry = StreamRegistry::new(client.clone(), Arc::new(Enricher::new()));
    let driver = Arc::new(LogDriver::new(registry, config.log_root.clone()));

    let (listener, _socket_guard) = match socket::bind(&config.socket_path) {
        Ok(bound) => bound,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(plugin::serve(
        listener,
        Arc::clone(&driver),
        shutdown.clone(),
    ));
    info!(
        "moby-nats-logdriver {} serving on {}, publishing to {:?}",
        env!("CARGO_PKG_VERSION"),
        config.socket_path,
        config.nats_subject
    );

    let mut exit = ExitCode::SUCCESS;
    tokio::select! {
        () = wait_for_signal() => info!("shutting down"),
        result = server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("plugin server stopped: {e}"),
                Err(e) => error!("plugin server task failed: {e}"),
            }
            exit = ExitCode::FAILURE;
        }
    }
    shutdown.cancel();

    driver.shutdown().await;
    if let Err(e) = client.disconnect().await {
        error!("error closing NATS connection: {e}");
    }

    exit
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,async_nats=warn,{log_level}");
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("unable to install log subscriber: {e}");
    }
    debug!("Logging subsystem enabled");
}

async fn wait_for_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("unable to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("received SIGINT"),
        _ = terminate.recv() => debug!("received SIGTERM"),
    }
}
