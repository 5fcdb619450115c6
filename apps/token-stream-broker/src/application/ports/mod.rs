//! Port Interfaces
//!
//! Defines the interfaces (ports) the broker uses to reach external systems
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these; tests substitute mocks.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamControl`]: pushes the desired topic set to the upstream connection
//! - [`ConsumerSink`]: delivers one message to one consumer session
//!
//! ## Events (Inbound)
//!
//! - [`UpstreamEvent`]: what the upstream connection reports back to the broker

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::domain::streaming::{ConsumerMessage, FeedEvent};
use crate::domain::subscription::Topic;

// =============================================================================
// Upstream Connection
// =============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket, no pending attempt.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open and filter sent.
    Open,
    /// Self-initiated close in progress.
    Closing,
}

impl ConnectionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the upstream connection reports to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Connection state transition.
    StateChanged(ConnectionState),
    /// The socket closed.
    Disconnected {
        /// Whether the broker asked for the close (empty filter or shutdown).
        self_initiated: bool,
    },
    /// A reconnect attempt was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A parsed market data event.
    Feed(FeedEvent),
    /// Unrecoverable condition to report to every consumer.
    Fatal(String),
}

/// Control surface of the upstream connection.
///
/// The filter is a full replacement: each call carries every topic that
/// must be followed. An empty set tears the connection down.
pub trait UpstreamControl: Send + Sync {
    /// Replace the desired upstream topic set.
    fn set_filter(&self, topics: BTreeSet<Topic>);
}

// =============================================================================
// Consumer Delivery
// =============================================================================

/// Delivery to a consumer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The consumer's channel is gone.
    #[error("consumer channel closed")]
    Closed,
}

/// Output channel of one consumer session.
///
/// Implementations must never block: a slow consumer loses its oldest
/// pending messages rather than stalling the broker.
pub trait ConsumerSink: Send + Sync {
    /// Queue a message for the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] when the consumer went away.
    fn deliver(&self, message: ConsumerMessage) -> Result<(), DeliveryError>;
}
