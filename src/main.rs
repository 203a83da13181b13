//! Tollgate Proxy - Entry Point
//!
//! Asks for the listening port when it is not configured, binds the proxy and
//! runs the accept loop until Ctrl+C / SIGTERM or an accept failure.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::config::{self, Config, LogConfig, LogFormat};
use tollgate::proxy::{ConsoleReporter, InspectingProxy, TcpConnector};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    init_tracing(config.as_ref().map(|c| &c.log).ok());

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded");

    if config.proxy.port.is_none() {
        match prompt_port().await {
            Ok(port) => config.proxy.port = Some(port),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let connector = Arc::new(TcpConnector::new(config.upstream));
    let proxy = InspectingProxy::from_config(&config, connector, Arc::new(ConsoleReporter));

    let listener = match proxy.bind() {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            if let Some(port) = config.proxy.port {
                error!("Failed to start listening on port: {}", port);
            }
            return ExitCode::FAILURE;
        }
    };
    info!("Forwarding approved requests to {}", config.upstream);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let proxy_task = tokio::spawn(async move { proxy.run(listener, shutdown_rx).await });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown_tx.closed() => {}
    }

    match proxy_task.await {
        Ok(Ok(())) => info!("Tollgate stopped"),
        Ok(Err(e)) => error!("Proxy server stopped: {}", e),
        Err(e) => error!("Proxy task failed: {}", e),
    }

    ExitCode::SUCCESS
}

fn init_tracing(log: Option<&LogConfig>) {
    let level = log.map(|l| l.level.as_str()).unwrap_or("info");
    let format = log.map(|l| l.format).unwrap_or_default();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tollgate={}", level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Ask the operator for the listening port on stdin
async fn prompt_port() -> anyhow::Result<u16> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Enter the port number: \n").await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read port from stdin")?;

    Ok(config::parse_port(&line)?)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
