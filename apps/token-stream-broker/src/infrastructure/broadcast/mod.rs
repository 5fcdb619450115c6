//! Consumer Outboxes
//!
//! Per-session delivery queues built on tokio broadcast channels with a
//! single receiver. Sending never blocks: when a consumer falls behind, the
//! oldest queued messages are overwritten and the receiver learns how many
//! it missed.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::application::ports::{ConsumerSink, DeliveryError};
use crate::domain::streaming::ConsumerMessage;
use crate::infrastructure::metrics;

/// Default number of messages queued per session.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Create a bounded outbox and its receiving end.
#[must_use]
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (Outbox { tx }, OutboxReceiver { rx })
}

/// Sending half, held by the broker.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: broadcast::Sender<ConsumerMessage>,
}

impl ConsumerSink for Outbox {
    fn deliver(&self, message: ConsumerMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Receiving half, drained by the consumer's connection task.
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: broadcast::Receiver<ConsumerMessage>,
}

impl OutboxReceiver {
    /// Next message, skipping over anything lost to lag.
    ///
    /// Returns `None` once the broker drops the sending half.
    pub async fn recv(&mut self) -> Option<ConsumerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Consumer lagging, oldest messages dropped");
                    metrics::record_messages_dropped("lagged", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
