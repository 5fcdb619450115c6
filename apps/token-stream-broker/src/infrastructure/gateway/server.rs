//! Consumer WebSocket Gateway
//!
//! Each accepted socket becomes one broker session: attach on connect,
//! detach on close. Outbound messages flow from the session's outbox to the
//! socket on a dedicated task; inbound frames are parsed and turned into
//! broker commands on the connection task.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::{Command, parse_request};
use crate::application::ports::ConsumerSink;
use crate::application::services::{BrokerError, BrokerHandle};
use crate::domain::streaming::ConsumerMessage;
use crate::domain::subscription::SessionId;
use crate::infrastructure::broadcast::{Outbox, outbox};

// =============================================================================
// State
// =============================================================================

/// Shared state for gateway connections.
#[derive(Clone)]
pub struct GatewayState {
    broker: BrokerHandle,
    queue_capacity: usize,
    cancel: CancellationToken,
}

impl GatewayState {
    /// Create gateway state.
    #[must_use]
    pub const fn new(broker: BrokerHandle, queue_capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            broker,
            queue_capacity,
            cancel,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Consumer-facing WebSocket server.
pub struct GatewayServer {
    port: u16,
    state: GatewayState,
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub const fn new(port: u16, state: GatewayState) -> Self {
        Self { port, state }
    }

    /// Build the router without binding.
    #[must_use]
    pub fn router(state: GatewayState) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Run the gateway until the state's token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayServerError` if binding fails or the server stops
    /// with an I/O error.
    pub async fn run(self) -> Result<(), GatewayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Gateway listening");
        serve(listener, self.state).await
    }
}

/// Serve the gateway on an already-bound listener.
///
/// # Errors
///
/// Returns `GatewayServerError::ServerFailed` if the server stops with an
/// I/O error.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), GatewayServerError> {
    let cancel = state.cancel.clone();
    axum::serve(listener, GatewayServer::router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| GatewayServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let conn_id = Uuid::new_v4();
    let (sink, mut outbox_rx) = outbox(state.queue_capacity);

    let session = match state.broker.attach(Arc::new(sink.clone())).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "Rejecting consumer");
            return;
        }
    };
    tracing::info!(%conn_id, %session, "Consumer connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize consumer message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,

            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), session, &state.broker, &sink).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "Consumer socket error");
                    break;
                }
            },
        }
    }

    match state.broker.detach(session).await {
        Ok(()) | Err(BrokerError::Stopped) => {}
        Err(e) => tracing::warn!(%conn_id, %session, error = %e, "Detach failed"),
    }
    drop(sink);
    send_task.abort();
    tracing::info!(%conn_id, %session, "Consumer disconnected");
}

async fn handle_text(text: &str, session: SessionId, broker: &BrokerHandle, sink: &Outbox) {
    let result = match parse_request(text) {
        Ok(Command::Subscribe(topic, kind)) => broker
            .subscribe(session, topic, kind)
            .await
            .map_err(|e| e.to_string()),
        Ok(Command::Unsubscribe(topic)) => broker
            .unsubscribe(session, topic)
            .await
            .map_err(|e| e.to_string()),
        Ok(Command::Ping) => {
            let _ = sink.deliver(ConsumerMessage::Pong {
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            });
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    };

    if let Err(message) = result {
        tracing::debug!(%session, error = %message, "Consumer request rejected");
        let _ = sink.deliver(ConsumerMessage::error(message));
    }
}
