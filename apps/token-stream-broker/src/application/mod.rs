//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the broker services and the port interfaces that
//! define how they reach the upstream feed and the consumers.

/// Port interfaces for the upstream connection and consumer delivery.
pub mod ports;

/// Application services: the broker actor and the dispatcher.
pub mod services;
