#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Token Stream Broker - Market Data Fan-out
//!
//! Holds one WebSocket connection to Mobula's token-details feed and fans
//! price and trade updates out to any number of consumer sessions. The
//! upstream filter always equals the union of what consumers follow, plus the
//! reference asset whenever a price cross-rate needs it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `subscription`: Topics, sessions, the registry and the reference resolver
//!   - `streaming`: Upstream events, consumer messages, the replay cache
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream control, consumer sinks, upstream events
//!   - `services`: The broker actor and the dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mobula`: Upstream connection manager
//!   - `broadcast`: Per-session outboxes
//!   - `gateway`: Consumer WebSocket server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                    filter (watch)
//!        ┌──────────────────────────────────┐
//!        ▼                                  │
//! Mobula WS ──events──► Broker actor ──► outbox ──► Consumer 1
//!                          ▲  │      ──► outbox ──► Consumer 2
//!                commands  │  └───── ──► outbox ──► Consumer N
//!                          │
//!                 Gateway (/ws)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    ConsumerMessage, FeedEvent, PriceData, PriceUpdate, ReplayCache, Trade, TradeEvent,
    TradeFeedData, TradeSide, UpstreamStatus,
};
pub use domain::subscription::{
    ReferenceResolver, RegistryStats, SessionId, Subscription, SubscriptionKind,
    SubscriptionRegistry, Topic,
};

// Ports and services
pub use application::ports::{
    ConnectionState, ConsumerSink, DeliveryError, UpstreamControl, UpstreamEvent,
};
pub use application::services::{Broker, BrokerError, BrokerHandle, BrokerSnapshot};

// Infrastructure config
pub use infrastructure::config::{BrokerConfig, ConfigError, Credentials};

// Servers
pub use infrastructure::gateway::{GatewayServer, GatewayServerError, GatewayState};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Upstream
pub use infrastructure::mobula::{FeedStatus, MobulaClient, MobulaClientConfig, UpstreamHandle};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
