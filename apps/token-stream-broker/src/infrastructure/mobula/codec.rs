//! Stream Codec
//!
//! Encodes subscription and keepalive frames and decodes inbound frames
//! into [`FeedEvent`]s. One inbound token payload yields a price update and,
//! when it also carries `type` and `hash`, a trade.

use rust_decimal::Decimal;

use super::messages::{PingRequest, SubscribeRequest, TokenMessage, WireNumber};
use crate::domain::streaming::{FeedEvent, PriceUpdate, Trade, TradeEvent, TradeSide};
use crate::domain::subscription::Topic;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field could not be read.
    #[error("invalid number in {field}: {value}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Server ping or pong.
    Heartbeat,
    /// Subscription acknowledgement.
    Subscribed,
    /// Repeated payload flagged by the server.
    Duplicate,
    /// Valid JSON without a token address.
    Unrecognized,
    /// Market data.
    Events(Vec<FeedEvent>),
}

/// JSON codec for the token-details stream.
#[derive(Debug, Default, Clone)]
pub struct MobulaCodec;

impl MobulaCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a full-replacement subscription for the given topics.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe<'a>(
        &self,
        api_key: &str,
        blockchain: &str,
        topics: impl IntoIterator<Item = &'a Topic>,
    ) -> Result<String, CodecError> {
        let request = SubscribeRequest::new(api_key, blockchain, topics.into_iter().map(Topic::as_str));
        Ok(serde_json::to_string(&request)?)
    }

    /// Encode the keepalive ping.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_ping(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&PingRequest::default())?)
    }

    /// Decode one inbound text frame.
    ///
    /// `now_ms` stamps trades that carry no usable time.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or a numeric
    /// field cannot be read.
    pub fn decode(&self, text: &str, now_ms: i64) -> Result<Inbound, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        if matches!(
            object.get("event").and_then(serde_json::Value::as_str),
            Some("ping" | "pong")
        ) {
            return Ok(Inbound::Heartbeat);
        }

        if object.get("type").and_then(serde_json::Value::as_str) == Some("subscribed") {
            return Ok(Inbound::Subscribed);
        }

        if object.contains_key("duplicateCount") {
            return Ok(Inbound::Duplicate);
        }

        let message: TokenMessage = serde_json::from_value(value)?;
        Self::token_events(message, now_ms)
    }

    fn token_events(message: TokenMessage, now_ms: i64) -> Result<Inbound, CodecError> {
        let Some(token_data) = message.token_data else {
            return Ok(Inbound::Unrecognized);
        };
        let Some(address) = token_data.address.filter(|a| !a.is_empty()) else {
            return Ok(Inbound::Unrecognized);
        };

        let topic = Topic::new(address);
        let price = number("token_price", message.token_price.as_ref())?;
        let change = number(
            "priceChange24hPercentage",
            token_data.price_change24h_percentage.as_ref(),
        )?;

        let mut events = vec![FeedEvent::Price(PriceUpdate {
            topic: topic.clone(),
            price,
            change_percent_24h: change,
        })];

        if let (Some(kind), Some(hash)) = (message.kind, message.hash) {
            match TradeSide::parse(&kind) {
                Some(side) => {
                    let timestamp_ms = message
                        .timestamp
                        .as_ref()
                        .and_then(|t| t.to_millis())
                        .or_else(|| message.date.as_ref().and_then(|t| t.to_millis()))
                        .unwrap_or(now_ms);

                    events.push(FeedEvent::Trade(TradeEvent {
                        topic,
                        trade: Trade {
                            id: hash.clone(),
                            price,
                            amount: number("token_amount_usd", message.token_amount_usd.as_ref())?,
                            timestamp_ms,
                            side,
                            external_ref: hash,
                        },
                    }));
                }
                None => {
                    tracing::debug!(kind = %kind, topic = %topic.short(), "Skipping trade with unknown side");
                }
            }
        }

        Ok(Inbound::Events(events))
    }
}

/// Read an optional numeric field; absent means zero.
fn number(field: &'static str, value: Option<&WireNumber>) -> Result<Decimal, CodecError> {
    value.map_or(Ok(Decimal::ZERO), |v| {
        v.to_decimal().ok_or_else(|| CodecError::InvalidNumber {
            field,
            value: v.to_string(),
        })
    })
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;

    const NOW: i64 = 1_000;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn events(text: &str) -> Vec<FeedEvent> {
        match MobulaCodec::new().decode(text, NOW).unwrap() {
            Inbound::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        }
    }

    #[test_case(r#"{"event":"ping"}"#, Inbound::Heartbeat ; "server ping")]
    #[test_case(r#"{"event":"pong"}"#, Inbound::Heartbeat ; "server pong")]
    #[test_case(r#"{"type":"subscribed"}"#, Inbound::Subscribed ; "ack")]
    #[test_case(r#"{"duplicateCount":3,"tokenData":{"address":"A"}}"#, Inbound::Duplicate ; "duplicate")]
    #[test_case(r#"{"foo":"bar"}"#, Inbound::Unrecognized ; "no token data")]
    #[test_case(r#"{"tokenData":{}}"#, Inbound::Unrecognized ; "no address")]
    fn control_frames(text: &str, expected: Inbound) {
        assert_eq!(MobulaCodec::new().decode(text, NOW).unwrap(), expected);
    }

    #[test]
    fn price_payload() {
        let out = events(
            r#"{"tokenData":{"address":"TOKEN","priceChange24hPercentage":"-4.5"},"token_price":0.0123}"#,
        );

        assert_eq!(
            out,
            vec![FeedEvent::Price(PriceUpdate {
                topic: Topic::from("TOKEN"),
                price: dec("0.0123"),
                change_percent_24h: dec("-4.5"),
            })]
        );
    }

    #[test]
    fn trade_payload_yields_price_then_trade() {
        let out = events(
            r#"{"tokenData":{"address":"TOKEN"},"token_price":"2","type":"SELL","hash":"0xabc","token_amount_usd":"150.5","date":1700000000000}"#,
        );

        assert_eq!(out.len(), 2);
        let FeedEvent::Trade(trade) = &out[1] else {
            panic!("expected trade");
        };
        assert_eq!(trade.trade.side, TradeSide::Sell);
        assert_eq!(trade.trade.id, "0xabc");
        assert_eq!(trade.trade.external_ref, "0xabc");
        assert_eq!(trade.trade.price, dec("2"));
        assert_eq!(trade.trade.amount, dec("150.5"));
        assert_eq!(trade.trade.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn trade_without_time_uses_now() {
        let out = events(r#"{"tokenData":{"address":"T"},"type":"buy","hash":"h"}"#);

        let FeedEvent::Trade(trade) = &out[1] else {
            panic!("expected trade");
        };
        assert_eq!(trade.trade.timestamp_ms, NOW);
        assert_eq!(trade.trade.amount, Decimal::ZERO);
    }

    #[test]
    fn unknown_side_keeps_price_only() {
        let out = events(r#"{"tokenData":{"address":"T"},"token_price":1,"type":"swap","hash":"h"}"#);
        assert_eq!(out.len(), 1);
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2]" ; "array")]
    #[test_case(r#"{"tokenData":{"address":"T"},"token_price":"abc"}"# ; "bad number")]
    fn malformed_frames_are_errors(text: &str) {
        assert!(MobulaCodec::new().decode(text, NOW).is_err());
    }

    #[test]
    fn encode_subscribe_lists_every_topic() {
        let topics = [Topic::from("A"), Topic::from("B")];
        let text = MobulaCodec::new()
            .encode_subscribe("key", "solana", &topics)
            .unwrap();

        assert!(text.contains(r#""authorization":"key""#));
        assert!(text.contains(r#"{"blockchain":"solana","address":"A"}"#));
        assert!(text.contains(r#"{"blockchain":"solana","address":"B"}"#));
    }
}
