//! Mobula WebSocket Client
//!
//! Owns the single upstream connection to the token-details stream.
//!
//! # Lifecycle
//!
//! ```text
//! disconnected ──(non-empty filter)──► connecting ──► open ──(empty filter)──► closing ──► disconnected
//!      ▲                                    │          │
//!      └────────(backoff, filter kept)──────┴──────────┘ unexpected close / failure
//! ```
//!
//! The desired topic set arrives on a `watch` channel through
//! [`UpstreamHandle`]. While open, every change is sent as one
//! full-replacement subscription. An empty set closes the socket without
//! reconnecting. Unexpected closes back off exponentially until the policy
//! is exhausted, after which a fatal error is reported and the client waits
//! for the next filter change.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, Inbound, MobulaCodec};
use super::heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::status::FeedStatus;
use crate::application::ports::{ConnectionState, UpstreamControl, UpstreamEvent};
use crate::domain::subscription::Topic;
use crate::infrastructure::metrics;

/// Message reported to consumers when no API key is configured.
pub const MISSING_API_KEY: &str = "API key not configured";

/// Time allowed for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// No traffic after a ping for longer than the pong timeout.
    #[error("no response to ping for {0:?}")]
    PongTimeout(Duration),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Mobula client.
#[derive(Clone)]
pub struct MobulaClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// API key; `None` makes every bring-up fail with [`MISSING_API_KEY`].
    pub api_key: Option<String>,
    /// Chain the topics live on.
    pub blockchain: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Keepalive configuration.
    pub heartbeat: HeartbeatConfig,
}

impl MobulaClientConfig {
    /// Create a configuration with default backoff and keepalive.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            blockchain: "solana".to_string(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl fmt::Debug for MobulaClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MobulaClientConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("blockchain", &self.blockchain)
            .field("reconnect", &self.reconnect)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

// =============================================================================
// Control Handle
// =============================================================================

/// Sets the client's desired topic set. Latest value wins.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    filter: Arc<watch::Sender<BTreeSet<Topic>>>,
}

impl UpstreamControl for UpstreamHandle {
    fn set_filter(&self, topics: BTreeSet<Topic>) {
        self.filter.send_replace(topics);
    }
}

// =============================================================================
// Client
// =============================================================================

/// How an open connection ended without error.
enum Closed {
    /// Filter became empty; no reconnect.
    SelfInitiated,
    /// Shutdown requested.
    Shutdown,
}

/// Where the run loop is.
enum Phase {
    Idle,
    /// Topics are wanted but no API key is configured.
    KeyMissing,
    Connect,
    Backoff,
    Exhausted,
}

/// Mobula WebSocket client.
///
/// Manages the connection lifecycle including:
/// - Full-filter subscription on open and on every change
/// - Keepalive pings
/// - Automatic reconnection with exponential backoff
/// - Self-initiated teardown when nothing is requested
pub struct MobulaClient {
    config: MobulaClientConfig,
    codec: MobulaCodec,
    filter_rx: watch::Receiver<BTreeSet<Topic>>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl MobulaClient {
    /// Create a client and the handle that drives it.
    #[must_use]
    pub fn new(
        config: MobulaClientConfig,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> (Self, UpstreamHandle) {
        let (filter_tx, filter_rx) = watch::channel(BTreeSet::new());

        let client = Self {
            config,
            codec: MobulaCodec::new(),
            filter_rx,
            event_tx,
            status: Arc::new(FeedStatus::new()),
            cancel,
        };

        (
            client,
            UpstreamHandle {
                filter: Arc::new(filter_tx),
            },
        )
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Run the client until cancelled or the handle is dropped.
    pub async fn run(mut self) {
        let api_key = self.config.api_key.clone();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut phase = Phase::Idle;

        loop {
            phase = match phase {
                Phase::Idle => {
                    if !self.wait_for_filter(|topics| !topics.is_empty()).await {
                        break;
                    }
                    if api_key.is_some() {
                        Phase::Connect
                    } else {
                        self.report_missing_key().await;
                        Phase::KeyMissing
                    }
                }

                Phase::KeyMissing => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        changed = self.filter_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let wanted = !self.filter_rx.borrow_and_update().is_empty();
                            if wanted {
                                self.report_missing_key().await;
                                Phase::KeyMissing
                            } else {
                                Phase::Idle
                            }
                        }
                    }
                }

                Phase::Connect => {
                    let key = api_key.as_deref().unwrap_or_default();
                    match self.connect_and_run(key, &mut policy).await {
                        Ok(Closed::SelfInitiated) => {
                            self.set_state(ConnectionState::Disconnected).await;
                            self.emit(UpstreamEvent::Disconnected {
                                self_initiated: true,
                            })
                            .await;
                            policy.reset();
                            Phase::Idle
                        }
                        Ok(Closed::Shutdown) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Mobula connection error");
                            self.status.set_error(e.to_string());
                            self.set_state(ConnectionState::Disconnected).await;
                            self.emit(UpstreamEvent::Disconnected {
                                self_initiated: false,
                            })
                            .await;
                            Phase::Backoff
                        }
                    }
                }

                Phase::Backoff => {
                    if self.filter_rx.borrow().is_empty() {
                        policy.reset();
                        Phase::Idle
                    } else if let Some(delay) = policy.next_delay() {
                        let attempt = policy.attempt_count();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to Mobula stream"
                        );
                        metrics::record_reconnect();
                        self.status.record_reconnect_attempt();
                        self.emit(UpstreamEvent::Reconnecting { attempt, delay })
                            .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => Phase::Connect,
                            emptied = filter_matches(&mut self.filter_rx, BTreeSet::is_empty) => {
                                if !emptied {
                                    break;
                                }
                                tracing::info!("Filter emptied during backoff, reconnect cancelled");
                                policy.reset();
                                Phase::Idle
                            }
                        }
                    } else {
                        let message = format!(
                            "Upstream connection failed after {} attempts",
                            policy.max_attempts()
                        );
                        tracing::error!(attempts = policy.max_attempts(), "Mobula reconnect attempts exhausted");
                        // Only a later filter change may restart the connection.
                        self.filter_rx.borrow_and_update();
                        self.emit(UpstreamEvent::Fatal(message)).await;
                        Phase::Exhausted
                    }
                }

                Phase::Exhausted => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        changed = self.filter_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            policy.reset();
                            Phase::Idle
                        }
                    }
                }
            };
        }

        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Mobula client stopped");
    }

    /// Wait until the filter satisfies `ready`.
    ///
    /// Returns `false` on shutdown or when the handle is gone.
    async fn wait_for_filter(&mut self, ready: impl FnMut(&BTreeSet<Topic>) -> bool) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            matched = filter_matches(&mut self.filter_rx, ready) => matched,
        }
    }

    /// Connect, subscribe and pump frames until the connection ends.
    async fn connect_and_run(
        &mut self,
        api_key: &str,
        policy: &mut ReconnectPolicy,
    ) -> Result<Closed, UpstreamError> {
        tracing::info!(url = %self.config.url, "Connecting to Mobula stream");
        self.set_state(ConnectionState::Connecting).await;

        let connect = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(Closed::Shutdown),
            result = connect => result.map_err(|_| UpstreamError::ConnectTimeout(CONNECT_TIMEOUT))??,
        };

        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Open).await;
        policy.reset();
        tracing::info!("Mobula stream connected");

        let topics = self.filter_rx.borrow_and_update().clone();
        if topics.is_empty() {
            self.set_state(ConnectionState::Closing).await;
            let _ = write.send(Message::Close(None)).await;
            return Ok(Closed::SelfInitiated);
        }
        self.send_filter(&mut write, api_key, &topics).await?;

        let mut heartbeat = Heartbeat::start(self.config.heartbeat.clone());

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Closed::Shutdown);
                }
                event = heartbeat.tick() => match event {
                    HeartbeatEvent::SendPing => {
                        write.send(Message::Text(self.codec.encode_ping()?.into())).await?;
                    }
                    HeartbeatEvent::Timeout(silent) => {
                        return Err(UpstreamError::PongTimeout(silent));
                    }
                },
                changed = self.filter_rx.changed() => {
                    if changed.is_err() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Closed::Shutdown);
                    }

                    let topics = self.filter_rx.borrow_and_update().clone();
                    if topics.is_empty() {
                        tracing::info!("No topics requested, closing Mobula stream");
                        self.set_state(ConnectionState::Closing).await;
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Closed::SelfInitiated);
                    }
                    self.send_filter(&mut write, api_key, &topics).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            heartbeat.record_activity();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and forward its events.
    async fn handle_text_message(&self, text: &str) {
        let now_ms = chrono::Utc::now().timestamp_millis();

        match self.codec.decode(text, now_ms) {
            Ok(Inbound::Events(events)) => {
                for event in events {
                    self.status.record_message();
                    self.emit(UpstreamEvent::Feed(event)).await;
                }
            }
            Ok(Inbound::Subscribed) => tracing::info!("Mobula subscription confirmed"),
            Ok(Inbound::Duplicate) => tracing::trace!("Discarding duplicate payload"),
            Ok(Inbound::Heartbeat | Inbound::Unrecognized) => {}
            Err(e) => {
                metrics::record_parse_error();
                tracing::warn!(error = %e, "Discarding malformed Mobula message");
            }
        }
    }

    /// Send the full filter.
    async fn send_filter<W>(
        &self,
        write: &mut W,
        api_key: &str,
        topics: &BTreeSet<Topic>,
    ) -> Result<(), UpstreamError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let json = self
            .codec
            .encode_subscribe(api_key, &self.config.blockchain, topics)?;

        tracing::debug!(topics = topics.len(), "Sending token-details subscription");
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Report a bring-up attempt without a key.
    async fn report_missing_key(&self) {
        tracing::error!("Mobula API key not configured");
        self.status.set_error(MISSING_API_KEY);
        self.emit(UpstreamEvent::Fatal(MISSING_API_KEY.to_string()))
            .await;
    }

    async fn set_state(&self, state: ConnectionState) {
        self.status.set_state(state);
        self.emit(UpstreamEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: UpstreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Broker gone, upstream event dropped");
        }
    }
}

/// Wait until the filter satisfies `ready`; `false` when the sender is gone.
async fn filter_matches(
    filter_rx: &mut watch::Receiver<BTreeSet<Topic>>,
    ready: impl FnMut(&BTreeSet<Topic>) -> bool,
) -> bool {
    filter_rx.wait_for(ready).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_drops_blank_api_key() {
        let config = MobulaClientConfig::new("wss://example", Some("   ".into()));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = MobulaClientConfig::new("wss://example", Some("secret-key".into()));
        let debug = format!("{config:?}");

        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn handle_replaces_filter() {
        let (tx, _rx) = mpsc::channel(4);
        let (client, handle) =
            MobulaClient::new(MobulaClientConfig::new("wss://example", None), tx, CancellationToken::new());

        handle.set_filter(BTreeSet::from([Topic::from("A")]));
        handle.set_filter(BTreeSet::from([Topic::from("B")]));

        assert_eq!(*client.filter_rx.borrow(), BTreeSet::from([Topic::from("B")]));
    }

    async fn next_event(rx: &mut mpsc::Receiver<UpstreamEvent>) -> UpstreamEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn missing_key_reported_on_every_filter_change() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (client, handle) =
            MobulaClient::new(MobulaClientConfig::new("wss://example", None), tx, cancel.clone());
        let task = tokio::spawn(client.run());
        let fatal = UpstreamEvent::Fatal(MISSING_API_KEY.to_string());

        handle.set_filter(BTreeSet::from([Topic::from("A")]));
        assert_eq!(next_event(&mut rx).await, fatal);

        // A later subscriber hears it too.
        handle.set_filter(BTreeSet::from([Topic::from("A"), Topic::from("B")]));
        assert_eq!(next_event(&mut rx).await, fatal);

        // Draining the filter is silent; refilling it reports again.
        handle.set_filter(BTreeSet::new());
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
        handle.set_filter(BTreeSet::from([Topic::from("C")]));
        assert_eq!(next_event(&mut rx).await, fatal);

        cancel.cancel();
        task.await.unwrap();
    }
}
