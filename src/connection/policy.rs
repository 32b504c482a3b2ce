use serde::Deserialize;
use std::time::Duration;

/// Server address used when `EMOTION_WS_URL` is unset
pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";

/// Delay growth between reconnect attempts
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// delay * factor^(attempt - 1), capped at max_delay_ms
    Exponential { factor: f64, max_delay_ms: u64 },
}

/// How many times, and how far apart, to retry a dropped connection
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failures that move the connection to `Failed`
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                factor,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = self.delay.as_millis() as f64 * factor.max(1.0).powi(exponent);
                let capped = scaled.min(*max_delay_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(default_max_attempts(), Duration::from_millis(default_delay_ms()))
    }
}

/// Connection configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_max_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_url() -> String {
    std::env::var("EMOTION_WS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    3000
}

impl ConnectionConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
            backoff: self.backoff.clone(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: default_max_attempts(),
            reconnect_delay_ms: default_delay_ms(),
            backoff: Backoff::default(),
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        for attempt in 1..=5 {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(3));
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(500),
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_delay_ms: 5000,
            },
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_config_builds_policy() {
        let config = ConnectionConfig {
            url: "ws://example.test/ws".to_string(),
            max_reconnect_attempts: 2,
            reconnect_delay_ms: 250,
            backoff: Backoff::Fixed,
        };

        assert_eq!(
            config.policy(),
            ReconnectPolicy::fixed(2, Duration::from_millis(250))
        );
    }
}
