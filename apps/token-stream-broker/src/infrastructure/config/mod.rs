//! Configuration Module
//!
//! Environment-driven settings for the broker and its servers.

mod settings;

pub use settings::{
    BrokerConfig, BrokerSettings, ConfigError, Credentials, DEFAULT_REFERENCE_ASSET,
    ServerSettings, UpstreamSettings,
};
