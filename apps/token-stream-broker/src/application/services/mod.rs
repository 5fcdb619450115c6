//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `broker`: Consumer session manager and its single-writer actor
//! - `dispatcher`: Routes upstream events to matching consumers

pub mod broker;
pub mod dispatcher;

pub use broker::{Broker, BrokerCommand, BrokerError, BrokerHandle, BrokerSnapshot, spawn};
pub use dispatcher::{Delivery, Dispatcher};
