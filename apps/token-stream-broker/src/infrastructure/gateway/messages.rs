//! Consumer Protocol Messages
//!
//! Requests consumers send over the gateway socket. Replies and pushed data
//! use [`ConsumerMessage`](crate::domain::streaming::ConsumerMessage).

use serde::Deserialize;

use crate::domain::subscription::{SubscriptionKind, Topic};

/// A request from a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Follow a topic.
    Subscribe {
        /// Token address.
        topic: String,
        /// Kind of data wanted; price when omitted.
        #[serde(default = "default_kind")]
        kind: SubscriptionKind,
    },
    /// Stop following a topic.
    Unsubscribe {
        /// Token address.
        topic: String,
    },
    /// Gateway keepalive.
    Ping,
}

const fn default_kind() -> SubscriptionKind {
    SubscriptionKind::Price
}

/// A request that could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or incomplete request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow `topic` with `kind`.
    Subscribe(Topic, SubscriptionKind),
    /// Stop following `topic`.
    Unsubscribe(Topic),
    /// Reply with a pong.
    Ping,
}

/// Parse and validate one text frame.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for malformed JSON, unknown
/// request types or kinds, and blank topics.
pub fn parse_request(text: &str) -> Result<Command, GatewayError> {
    let request: ClientRequest =
        serde_json::from_str(text).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    match request {
        ClientRequest::Subscribe { topic, kind } => Ok(Command::Subscribe(topic_from(topic)?, kind)),
        ClientRequest::Unsubscribe { topic } => Ok(Command::Unsubscribe(topic_from(topic)?)),
        ClientRequest::Ping => Ok(Command::Ping),
    }
}

fn topic_from(raw: String) -> Result<Topic, GatewayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidRequest("topic cannot be empty".to_string()));
    }
    Ok(Topic::new(trimmed))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(r#"{"type":"subscribe","topic":"A","kind":"price"}"#, SubscriptionKind::Price ; "price")]
    #[test_case(r#"{"type":"subscribe","topic":"A","kind":"live-price"}"#, SubscriptionKind::Price ; "legacy price name")]
    #[test_case(r#"{"type":"subscribe","topic":"A","kind":"trade-feed"}"#, SubscriptionKind::TradeFeed ; "trade feed")]
    #[test_case(r#"{"type":"subscribe","topic":"A"}"#, SubscriptionKind::Price ; "kind omitted")]
    fn parses_subscribe(text: &str, kind: SubscriptionKind) {
        assert_eq!(
            parse_request(text).unwrap(),
            Command::Subscribe(Topic::new("A"), kind)
        );
    }

    #[test]
    fn parses_unsubscribe_and_ping() {
        assert_eq!(
            parse_request(r#"{"type":"unsubscribe","topic":" A "}"#).unwrap(),
            Command::Unsubscribe(Topic::new("A"))
        );
        assert_eq!(parse_request(r#"{"type":"ping"}"#).unwrap(), Command::Ping);
    }

    #[test_case("not json" ; "not json")]
    #[test_case(r#"{"type":"dance"}"# ; "unknown type")]
    #[test_case(r#"{"type":"subscribe","topic":"A","kind":"candles"}"# ; "unknown kind")]
    #[test_case(r#"{"type":"subscribe","topic":"  "}"# ; "blank topic")]
    #[test_case(r#"{"type":"unsubscribe"}"# ; "missing topic")]
    fn rejects_invalid(text: &str) {
        assert!(matches!(
            parse_request(text),
            Err(GatewayError::InvalidRequest(_))
        ));
    }
}
