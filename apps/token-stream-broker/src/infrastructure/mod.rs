//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application layer,
//! plus the servers and process-wide plumbing.

/// Mobula WebSocket connection manager.
pub mod mobula;

/// Per-session outboxes.
pub mod broadcast;

/// Environment configuration.
pub mod config;

/// Consumer WebSocket gateway.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
