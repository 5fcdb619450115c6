//! Domain Layer - Core subscription and market data types.
//!
//! This layer holds the registry, the derived reference subscription, and
//! the replay cache. Nothing here performs I/O; the broker actor owns every
//! value and serializes access to it.

/// Market data types (prices, trades, consumer messages) and the replay cache.
pub mod streaming;

/// Subscription registry and derived reference subscription.
pub mod subscription;
