//! Market Data Streaming Types
//!
//! Core domain types for token market data: price updates, trades, and the
//! messages delivered to consumers. These types are codec-agnostic and
//! represent the canonical internal representation of feed data.

pub mod cache;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::subscription::{SubscriptionKind, Topic};

pub use cache::{CachedEntry, DEFAULT_REPLAY_DEPTH, ReplayCache};

// =============================================================================
// Upstream Events
// =============================================================================

/// A parsed event from the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Snapshot-style price update for a topic.
    Price(PriceUpdate),
    /// A single executed trade for a topic.
    Trade(TradeEvent),
}

impl FeedEvent {
    /// Topic the event belongs to.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        match self {
            Self::Price(update) => &update.topic,
            Self::Trade(event) => &event.topic,
        }
    }

    /// Metric label for the event.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Price(_) => "price",
            Self::Trade(_) => "trade",
        }
    }
}

/// Current price and 24h change for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    /// Token address.
    pub topic: Topic,
    /// Price in USD.
    pub price: Decimal,
    /// 24h price change in percent.
    pub change_percent_24h: Decimal,
}

/// A trade executed on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// Token address.
    pub topic: Topic,
    /// The trade.
    pub trade: Trade,
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl TradeSide {
    /// Parse a side case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// A single executed trade as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Trade identifier (transaction hash).
    pub id: String,
    /// Token price in USD at execution.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Trade size in USD.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Execution time in milliseconds since the epoch.
    pub timestamp_ms: i64,
    /// Trade direction.
    pub side: TradeSide,
    /// External reference (transaction hash on chain).
    pub external_ref: String,
}

// =============================================================================
// Consumer Messages
// =============================================================================

/// Upstream connection status as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    /// Upstream connection is open.
    Connected,
    /// Upstream connection is closed (possibly pending reconnect).
    Disconnected,
}

/// Price payload delivered to price subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    /// Token address.
    pub topic: Topic,
    /// Price in USD.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Price expressed in the reference asset (0 when unknown).
    #[serde(with = "rust_decimal::serde::float")]
    pub derived_cross_rate: Decimal,
    /// 24h price change in percent.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent_24h: Decimal,
    /// Time the message was built, in milliseconds since the epoch.
    pub timestamp_ms: i64,
}

/// Trade-feed payload: the full recent-history snapshot, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedData {
    /// Token address.
    pub topic: Topic,
    /// Most recent trades, newest first.
    pub trades: Vec<Trade>,
    /// Time the message was built, in milliseconds since the epoch.
    pub timestamp_ms: i64,
}

/// Data payload, shaped by subscription kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPayload {
    /// Price snapshot.
    Price(PriceData),
    /// Trade list snapshot.
    TradeFeed(TradeFeedData),
}

/// Message delivered to a consumer session.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "status", "status": "connected"}
/// {"type": "error", "message": "API key not configured"}
/// {"type": "data", "kind": "price", "data": {"topic": "...", "price": 1.5, "derivedCrossRate": 0.01, ...}}
/// {"type": "pong", "timestampMs": 1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerMessage {
    /// Upstream connection status.
    Status {
        /// Current status.
        status: UpstreamStatus,
    },
    /// Fatal or protocol error.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Market data for a subscribed topic.
    Data {
        /// Kind of the subscription this data answers.
        kind: SubscriptionKind,
        /// Payload.
        data: DataPayload,
    },
    /// Reply to a consumer ping.
    Pong {
        /// Server time in milliseconds since the epoch.
        #[serde(rename = "timestampMs")]
        timestamp_ms: i64,
    },
}

impl ConsumerMessage {
    /// Status message.
    #[must_use]
    pub const fn status(status: UpstreamStatus) -> Self {
        Self::Status { status }
    }

    /// Error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Price data message.
    #[must_use]
    pub const fn price(data: PriceData) -> Self {
        Self::Data {
            kind: SubscriptionKind::Price,
            data: DataPayload::Price(data),
        }
    }

    /// Trade-feed data message.
    #[must_use]
    pub const fn trade_feed(data: TradeFeedData) -> Self {
        Self::Data {
            kind: SubscriptionKind::TradeFeed,
            data: DataPayload::TradeFeed(data),
        }
    }

    /// Metric label for the message.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Data {
                kind: SubscriptionKind::Price,
                ..
            } => "price",
            Self::Data {
                kind: SubscriptionKind::TradeFeed,
                ..
            } => "trade_feed",
            Self::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn trade(id: &str) -> Trade {
        Trade {
            id: id.to_string(),
            price: Decimal::from_str("0.5").unwrap(),
            amount: Decimal::from_str("12.25").unwrap(),
            timestamp_ms: 1_700_000_000_000,
            side: TradeSide::Buy,
            external_ref: id.to_string(),
        }
    }

    #[test]
    fn status_message_wire_format() {
        let json = serde_json::to_value(ConsumerMessage::status(UpstreamStatus::Connected)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "status", "status": "connected"})
        );
    }

    #[test]
    fn price_message_wire_format() {
        let msg = ConsumerMessage::price(PriceData {
            topic: Topic::from("TOKEN"),
            price: Decimal::from_str("1.5").unwrap(),
            derived_cross_rate: Decimal::from_str("0.01").unwrap(),
            change_percent_24h: Decimal::from_str("-3.25").unwrap(),
            timestamp_ms: 42,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "data",
                "kind": "price",
                "data": {
                    "topic": "TOKEN",
                    "price": 1.5,
                    "derivedCrossRate": 0.01,
                    "changePercent24h": -3.25,
                    "timestampMs": 42
                }
            })
        );
    }

    #[test]
    fn trade_feed_message_uses_camel_case_keys() {
        let msg = ConsumerMessage::trade_feed(TradeFeedData {
            topic: Topic::from("TOKEN"),
            trades: vec![trade("0xabc")],
            timestamp_ms: 42,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "data",
                "kind": "trade-feed",
                "data": {
                    "topic": "TOKEN",
                    "trades": [{
                        "id": "0xabc",
                        "price": 0.5,
                        "amount": 12.25,
                        "timestampMs": 1_700_000_000_000_i64,
                        "side": "buy",
                        "externalRef": "0xabc"
                    }],
                    "timestampMs": 42
                }
            })
        );
    }

    #[test]
    fn pong_message_wire_format() {
        let json = serde_json::to_value(ConsumerMessage::Pong { timestamp_ms: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pong", "timestampMs": 7}));
    }

    #[test]
    fn trade_feed_message_round_trips() {
        let msg = ConsumerMessage::trade_feed(TradeFeedData {
            topic: Topic::from("TOKEN"),
            trades: vec![trade("b"), trade("a")],
            timestamp_ms: 42,
        });

        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""kind":"trade-feed""#));
        assert!(text.contains(r#""side":"buy""#));

        let decoded: ConsumerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn trade_side_parsing() {
        assert_eq!(TradeSide::parse("BUY"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("sell"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("swap"), None);
    }

    #[test]
    fn feed_event_topic() {
        let event = FeedEvent::Trade(TradeEvent {
            topic: Topic::from("TOKEN"),
            trade: trade("x"),
        });
        assert_eq!(event.topic(), &Topic::from("TOKEN"));
        assert_eq!(event.label(), "trade");
    }
}
