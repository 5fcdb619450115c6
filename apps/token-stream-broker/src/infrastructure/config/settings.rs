//! Broker Configuration Settings
//!
//! Configuration types for the broker, loaded from environment variables.

use std::time::Duration;

use crate::domain::subscription::Topic;
use crate::infrastructure::broadcast::DEFAULT_OUTBOX_CAPACITY;
use crate::infrastructure::mobula::{HeartbeatConfig, MobulaClientConfig, ReconnectConfig};

/// Wrapped SOL mint; prices are quoted against it by default.
pub const DEFAULT_REFERENCE_ASSET: &str = "So11111111111111111111111111111111111111112";

/// Mobula API credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    /// Create credentials; blank keys count as absent.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    /// Get the API key, if configured.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Get the API key or the error to surface to consumers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when no key is configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key()
            .ok_or_else(|| ConfigError::MissingEnvVar("MOBULA_API_KEY".to_string()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Mobula WebSocket URL.
    pub url: String,
    /// Chain every topic is requested on.
    pub blockchain: String,
    /// Keepalive ping interval.
    pub keepalive_interval: Duration,
    /// Silence tolerated after a ping (`None` = never time out).
    pub pong_timeout: Option<Duration>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Consecutive failures before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: "wss://api.mobula.io".to_string(),
            blockchain: "solana".to_string(),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: None,
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Asset cross rates are computed against.
    pub reference_asset: Topic,
    /// Trades kept per topic for replay.
    pub replay_depth: usize,
    /// Messages queued per consumer before the oldest are dropped.
    pub session_queue_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            reference_asset: Topic::new(DEFAULT_REFERENCE_ASSET),
            replay_depth: crate::domain::streaming::DEFAULT_REPLAY_DEPTH,
            session_queue_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Consumer WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 8090,
            health_port: 8082,
        }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Fan-out settings.
    pub broker: BrokerSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl BrokerConfig {
    /// Create configuration from environment variables.
    ///
    /// A missing API key is not an error here; it is reported to consumers
    /// when they first ask for data.
    ///
    /// # Errors
    ///
    /// Returns an error if a string setting is present but blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a string setting is present but blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let upstream_defaults = UpstreamSettings::default();
        let broker_defaults = BrokerSettings::default();
        let server_defaults = ServerSettings::default();

        let upstream = UpstreamSettings {
            url: env.string("MOBULA_WS_URL", upstream_defaults.url)?,
            blockchain: env.string("BROKER_BLOCKCHAIN", upstream_defaults.blockchain)?,
            keepalive_interval: env.duration_secs(
                "BROKER_KEEPALIVE_INTERVAL_SECS",
                upstream_defaults.keepalive_interval,
            ),
            pong_timeout: Some(env.parse("BROKER_PONG_TIMEOUT_SECS", 0_u64))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            reconnect_delay_initial: env.duration_millis(
                "BROKER_RECONNECT_DELAY_INITIAL_MS",
                upstream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "BROKER_RECONNECT_DELAY_MAX_SECS",
                upstream_defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: env.parse(
                "BROKER_MAX_RECONNECT_ATTEMPTS",
                upstream_defaults.max_reconnect_attempts,
            ),
        };

        let broker = BrokerSettings {
            reference_asset: Topic::new(env.string(
                "BROKER_REFERENCE_ASSET",
                broker_defaults.reference_asset.as_str().to_string(),
            )?),
            replay_depth: env.parse("BROKER_REPLAY_DEPTH", broker_defaults.replay_depth),
            session_queue_capacity: env.parse(
                "BROKER_SESSION_QUEUE_CAPACITY",
                broker_defaults.session_queue_capacity,
            ),
        };

        let server = ServerSettings {
            gateway_port: env.parse("BROKER_GATEWAY_PORT", server_defaults.gateway_port),
            health_port: env.parse("BROKER_HEALTH_PORT", server_defaults.health_port),
        };

        Ok(Self {
            credentials: Credentials::new(env.get("MOBULA_API_KEY")),
            upstream,
            broker,
            server,
        })
    }

    /// Connection manager configuration derived from these settings.
    #[must_use]
    pub fn mobula_client_config(&self) -> MobulaClientConfig {
        let mut config = MobulaClientConfig::new(
            self.upstream.url.clone(),
            self.credentials.api_key().map(str::to_string),
        );
        config.blockchain.clone_from(&self.upstream.blockchain);
        config.reconnect = ReconnectConfig {
            initial_delay: self.upstream.reconnect_delay_initial,
            max_delay: self.upstream.reconnect_delay_max,
            max_attempts: self.upstream.max_reconnect_attempts,
            ..ReconnectConfig::default()
        };
        config.heartbeat =
            HeartbeatConfig::new(self.upstream.keepalive_interval, self.upstream.pong_timeout);
        config
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(value.trim().to_string()),
            None => Ok(default),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Positive whole seconds; zero falls back to `default`.
    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_secs)
    }

    /// Positive whole milliseconds; zero falls back to `default`.
    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.positive(key).map_or(default, Duration::from_millis)
    }

    fn positive(&self, key: &str) -> Option<u64> {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<BrokerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BrokerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();

        assert!(config.credentials.api_key().is_none());
        assert_eq!(config.upstream.url, "wss://api.mobula.io");
        assert_eq!(config.upstream.blockchain, "solana");
        assert_eq!(config.upstream.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.upstream.pong_timeout, None);
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.upstream.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(config.upstream.max_reconnect_attempts, 5);
        assert_eq!(config.broker.reference_asset.as_str(), DEFAULT_REFERENCE_ASSET);
        assert_eq!(config.broker.replay_depth, 20);
        assert_eq!(config.broker.session_queue_capacity, 256);
        assert_eq!(config.server.gateway_port, 8090);
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn overrides_from_environment() {
        let config = config_from(&[
            ("MOBULA_API_KEY", "key123"),
            ("BROKER_PONG_TIMEOUT_SECS", "45"),
            ("BROKER_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("BROKER_MAX_RECONNECT_ATTEMPTS", "0"),
            ("BROKER_GATEWAY_PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(config.credentials.api_key(), Some("key123"));
        assert_eq!(config.upstream.pong_timeout, Some(Duration::from_secs(45)));
        assert_eq!(
            config.upstream.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.upstream.max_reconnect_attempts, 0);
        assert_eq!(config.server.gateway_port, 9000);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = config_from(&[("BROKER_REPLAY_DEPTH", "lots")]).unwrap();
        assert_eq!(config.broker.replay_depth, 20);
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let config = config_from(&[
            ("BROKER_KEEPALIVE_INTERVAL_SECS", "0"),
            ("BROKER_RECONNECT_DELAY_INITIAL_MS", "0"),
            ("BROKER_RECONNECT_DELAY_MAX_SECS", "0"),
            ("BROKER_PONG_TIMEOUT_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.upstream.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.upstream.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(config.upstream.pong_timeout, None);
    }

    #[test]
    fn blank_string_setting_is_rejected() {
        let err = config_from(&[("BROKER_REFERENCE_ASSET", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref key) if key == "BROKER_REFERENCE_ASSET"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = config_from(&[("MOBULA_API_KEY", "")]).unwrap();
        assert!(matches!(
            config.credentials.require_api_key(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new(Some("key123".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn client_config_carries_settings() {
        let config = config_from(&[
            ("MOBULA_API_KEY", "key123"),
            ("BROKER_BLOCKCHAIN", "base"),
            ("BROKER_RECONNECT_DELAY_MAX_SECS", "10"),
        ])
        .unwrap();

        let client = config.mobula_client_config();

        assert_eq!(client.api_key.as_deref(), Some("key123"));
        assert_eq!(client.blockchain, "base");
        assert_eq!(client.reconnect.max_delay, Duration::from_secs(10));
        assert_eq!(client.reconnect.max_attempts, 5);
        assert_eq!(client.heartbeat.ping_interval, Duration::from_secs(30));
    }
}
