//! Mobula WebSocket Message Types
//!
//! Wire types for the token-details stream.
//!
//! # Outbound
//!
//! ```json
//! {"type":"token-details","authorization":"<key>",
//!  "payload":{"tokens":[{"blockchain":"solana","address":"<addr>"}],"subscriptionTracking":true}}
//! {"event":"ping"}
//! ```
//!
//! # Inbound
//!
//! Token payloads carry `tokenData.address`, `token_price` and
//! `tokenData.priceChange24hPercentage`. Trade payloads additionally carry
//! `type` (buy/sell), `hash`, `token_amount_usd` and `timestamp` or `date`.
//! Numeric fields arrive either as JSON numbers or as strings.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Outbound Messages
// =============================================================================

/// Subscription type for the token-details stream.
pub const TOKEN_DETAILS: &str = "token-details";

/// Full-replacement subscription request.
#[derive(Clone, Serialize)]
pub struct SubscribeRequest {
    /// Always [`TOKEN_DETAILS`].
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// API key.
    pub authorization: String,
    /// Requested tokens.
    pub payload: SubscribePayload,
}

impl SubscribeRequest {
    /// Build a request following every address on one chain.
    #[must_use]
    pub fn new<'a>(
        api_key: &str,
        blockchain: &str,
        addresses: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            kind: TOKEN_DETAILS,
            authorization: api_key.to_string(),
            payload: SubscribePayload {
                tokens: addresses
                    .into_iter()
                    .map(|address| TokenRef {
                        blockchain: blockchain.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
                subscription_tracking: true,
            },
        }
    }
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("kind", &self.kind)
            .field("authorization", &"[REDACTED]")
            .field("payload", &self.payload)
            .finish()
    }
}

/// Payload of a subscription request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// Tokens to follow.
    pub tokens: Vec<TokenRef>,
    /// Ask the server to track the subscription.
    pub subscription_tracking: bool,
}

/// A token on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRef {
    /// Chain name.
    pub blockchain: String,
    /// Token address.
    pub address: String,
}

/// Keepalive ping.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PingRequest {
    /// Always `"ping"`.
    pub event: &'static str,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { event: "ping" }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A token-details payload, price and optional trade fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenMessage {
    /// Token metadata.
    #[serde(rename = "tokenData")]
    pub token_data: Option<TokenData>,
    /// Price in USD.
    pub token_price: Option<WireNumber>,
    /// Trade direction, present on trade payloads.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Transaction hash, present on trade payloads.
    pub hash: Option<String>,
    /// Trade size in USD.
    pub token_amount_usd: Option<WireNumber>,
    /// Trade time.
    pub timestamp: Option<WireTimestamp>,
    /// Trade time (alternate field).
    pub date: Option<WireTimestamp>,
}

/// Token metadata inside a payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    /// Token address.
    pub address: Option<String>,
    /// 24h price change in percent.
    pub price_change24h_percentage: Option<WireNumber>,
}

/// A number that may be sent as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    /// JSON number.
    Number(serde_json::Number),
    /// Numeric string.
    Text(String),
}

impl WireNumber {
    /// Convert to a decimal, accepting scientific notation.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        let text = match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        };

        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

impl fmt::Display for WireNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A timestamp sent as epoch milliseconds (number or string) or RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Integer milliseconds.
    Millis(i64),
    /// Fractional milliseconds.
    Fractional(f64),
    /// String form.
    Text(String),
}

impl WireTimestamp {
    /// Milliseconds since the epoch.
    #[must_use]
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            #[allow(clippy::cast_possible_truncation)]
            Self::Fractional(ms) if ms.is_finite() => Some(ms.trunc() as i64),
            Self::Fractional(_) => None,
            Self::Text(text) => {
                let text = text.trim();
                text.parse::<i64>().ok().or_else(|| {
                    DateTime::parse_from_rfc3339(text)
                        .ok()
                        .map(|dt| dt.timestamp_millis())
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let request = SubscribeRequest::new("key", "solana", ["AAA", "BBB"]);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "token-details",
                "authorization": "key",
                "payload": {
                    "tokens": [
                        {"blockchain": "solana", "address": "AAA"},
                        {"blockchain": "solana", "address": "BBB"}
                    ],
                    "subscriptionTracking": true
                }
            })
        );
    }

    #[test]
    fn subscribe_request_debug_redacts_key() {
        let request = SubscribeRequest::new("super-secret", "solana", ["AAA"]);
        let debug = format!("{request:?}");

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn ping_wire_format() {
        assert_eq!(
            serde_json::to_string(&PingRequest::default()).unwrap(),
            r#"{"event":"ping"}"#
        );
    }

    #[test]
    fn wire_number_accepts_numbers_and_strings() {
        let n: WireNumber = serde_json::from_str("1.25").unwrap();
        let s: WireNumber = serde_json::from_str("\"1.25\"").unwrap();
        let e: WireNumber = serde_json::from_str("1e-7").unwrap();

        assert_eq!(n.to_decimal(), Decimal::from_str("1.25").ok());
        assert_eq!(s.to_decimal(), Decimal::from_str("1.25").ok());
        assert_eq!(e.to_decimal(), Decimal::from_str("0.0000001").ok());
        assert_eq!(WireNumber::Text("abc".into()).to_decimal(), None);
    }

    #[test]
    fn wire_timestamp_forms() {
        assert_eq!(WireTimestamp::Millis(1_700_000_000_000).to_millis(), Some(1_700_000_000_000));
        assert_eq!(
            WireTimestamp::Text("1700000000000".into()).to_millis(),
            Some(1_700_000_000_000)
        );
        assert_eq!(
            WireTimestamp::Text("2023-11-14T22:13:20Z".into()).to_millis(),
            Some(1_700_000_000_000)
        );
        assert_eq!(WireTimestamp::Text("soon".into()).to_millis(), None);
    }
}
