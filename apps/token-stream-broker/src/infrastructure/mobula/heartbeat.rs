//! Keepalive
//!
//! Sends an application-level `{"event":"ping"}` on a fixed interval while
//! the socket is open. When a pong timeout is configured, a connection that
//! stays silent for longer than the timeout after a ping is reported dead.
//!
//! The heartbeat lives inside the connection loop, so it stops as soon as
//! that loop returns.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping; `None` disables the check.
    pub pong_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: None,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// What the connection loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// Nothing heard since the last ping for longer than the timeout.
    Timeout(Duration),
}

/// Per-connection keepalive timer.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Interval,
    last_seen: Instant,
    waiting_for_pong: bool,
}

impl Heartbeat {
    /// Start the timer; the first ping fires one interval from now.
    #[must_use]
    pub fn start(config: HeartbeatConfig) -> Self {
        let period = config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            config,
            interval,
            last_seen: Instant::now(),
            waiting_for_pong: false,
        }
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) -> HeartbeatEvent {
        self.interval.tick().await;

        if let Some(timeout) = self.config.pong_timeout {
            let silent = self.last_seen.elapsed();
            if self.waiting_for_pong && silent > timeout {
                tracing::warn!(
                    silent_ms = silent.as_millis(),
                    timeout_ms = timeout.as_millis(),
                    "Heartbeat timeout detected"
                );
                return HeartbeatEvent::Timeout(silent);
            }
        }

        self.waiting_for_pong = true;
        HeartbeatEvent::SendPing
    }

    /// Record inbound traffic; any frame proves the connection alive.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
        self.waiting_for_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }
}
