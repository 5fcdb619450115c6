//! Token Stream Broker Binary
//!
//! Starts the upstream connection manager, the broker actor, the consumer
//! gateway and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin token-stream-broker
//! ```
//!
//! # Environment Variables
//!
//! - `MOBULA_API_KEY`: Mobula API key (consumers get an error without it)
//! - `MOBULA_WS_URL`: Upstream URL (default: wss://api.mobula.io)
//! - `BROKER_BLOCKCHAIN`: Chain for every topic (default: solana)
//! - `BROKER_REFERENCE_ASSET`: Cross-rate reference (default: wrapped SOL)
//! - `BROKER_GATEWAY_PORT`: Consumer WebSocket port (default: 8090)
//! - `BROKER_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `BROKER_KEEPALIVE_INTERVAL_SECS`, `BROKER_PONG_TIMEOUT_SECS`
//! - `BROKER_RECONNECT_DELAY_INITIAL_MS`, `BROKER_RECONNECT_DELAY_MAX_SECS`,
//!   `BROKER_MAX_RECONNECT_ATTEMPTS`
//! - `BROKER_REPLAY_DEPTH`, `BROKER_SESSION_QUEUE_CAPACITY`
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use token_stream_broker::application::services::{Broker, spawn};
use token_stream_broker::infrastructure::gateway::{GatewayServer, GatewayState};
use token_stream_broker::infrastructure::health::{HealthServer, HealthServerState};
use token_stream_broker::infrastructure::mobula::MobulaClient;
use token_stream_broker::infrastructure::telemetry;
use token_stream_broker::{BrokerConfig, UpstreamEvent, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the upstream event queue.
const UPSTREAM_EVENT_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Token Stream Broker");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable");
    }

    let config = BrokerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream connection manager
    let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(UPSTREAM_EVENT_CAPACITY);
    let (client, upstream) = MobulaClient::new(
        config.mobula_client_config(),
        event_tx,
        shutdown_token.clone(),
    );
    let feed_status = client.status();
    let client_task = tokio::spawn(client.run());

    // Broker actor
    let broker = Broker::new(
        upstream,
        config.broker.reference_asset.clone(),
        config.broker.replay_depth,
    );
    let (broker_handle, broker_task) = spawn(broker, event_rx, shutdown_token.clone());

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_status,
        broker_handle.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Consumer gateway
    let gateway = GatewayServer::new(
        config.server.gateway_port,
        GatewayState::new(
            broker_handle,
            config.broker.session_queue_capacity,
            shutdown_token.clone(),
        ),
    );
    let gateway_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "Gateway error");
            gateway_shutdown.cancel();
        }
    });

    tracing::info!("Token stream broker ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = broker_task.await;
        let _ = client_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Token stream broker stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &BrokerConfig) {
    tracing::info!(
        upstream_url = %config.upstream.url,
        blockchain = %config.upstream.blockchain,
        reference = %config.broker.reference_asset.short(),
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    if let Err(e) = config.credentials.require_api_key() {
        tracing::warn!(error = %e, "Subscriptions will fail until an API key is configured");
    }
    tracing::debug!(config = ?config, "Full configuration");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or internal cancellation.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
