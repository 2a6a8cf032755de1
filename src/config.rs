//! Agent configuration.
//!
//! Plain config structs with defaults for each component, aggregated in
//! [`AgentConfig`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff policy for the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Initial delay between reconnect attempts in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter fraction applied symmetrically (0.2 = ±20%).
    #[serde(default = "default_jitter_frac")]
    pub jitter_frac: f64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_frac() -> f64 {
    0.2
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_frac: default_jitter_frac(),
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Retries are unlimited while the identity stays active; only the delay
    /// is bounded.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        if self.jitter_frac > 0.0 {
            let jitter = 1.0 + self.jitter_frac * (rand::random::<f64>() * 2.0 - 1.0);
            Duration::from_millis((capped * jitter).max(0.0) as u64)
        } else {
            Duration::from_millis(capped as u64)
        }
    }
}

/// Configuration for the event channel client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Notification server WebSocket URL.
    pub server_url: String,
    /// Reconnect backoff policy.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            server_url: "wss://localhost/notifications".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Configuration for the delivery dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the recently-seen id set used for duplicate suppression.
    pub seen_capacity: usize,
    /// Auto-dismiss delay for transient silent alerts in milliseconds.
    pub transient_dismiss_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            seen_capacity: 256,
            transient_dismiss_ms: 200,
        }
    }
}

/// Configuration for the offline action queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry ceiling per action; exhausted actions move to the failed list.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Configuration for the install tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// How long a dismissal suppresses the install prompt, in hours.
    pub dismiss_cooldown_hours: i64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            dismiss_cooldown_hours: 24,
        }
    }
}

/// Aggregated agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Event channel client configuration.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Delivery dispatcher configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Offline action queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Install tracker configuration.
    #[serde(default)]
    pub install: InstallConfig,
}
