//! Mobula WebSocket Adapter
//!
//! Connection manager for the Mobula token-details stream: wire messages,
//! JSON codec, keepalive, backoff, and the client that ties them together.

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod status;

pub use client::{
    MISSING_API_KEY, MobulaClient, MobulaClientConfig, UpstreamError, UpstreamHandle,
};
pub use codec::{CodecError, Inbound, MobulaCodec};
pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use status::FeedStatus;
