use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_QUEUE_CAPACITY: u64 = 10_000_000;
const MAX_FLOW_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_SWEEP_INTERVAL_MS: u64 = 60 * 60 * 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 60 * 1_000;
const MAX_SHUTDOWN_GRACE_MS: u64 = 10 * 60 * 1_000;

/// A configuration field outside its accepted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must be between {min} and {max}, got {value}")]
pub struct ConfigError {
    pub field: &'static str,
    pub value: u64,
    pub min: u64,
    pub max: u64,
}

/// Tunables for one engine instance.
///
/// Missing fields fall back to their defaults when deserialized.
///
/// # Examples
/// ```
/// use flowtap_core::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{"flow_timeout_secs": 60}"#).unwrap();
/// assert_eq!(config.flow_timeout_secs, 60);
/// assert_eq!(config.queue_capacity, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames held between capture and decode before new frames are dropped.
    pub queue_capacity: usize,
    /// Idle time after which a flow is evicted.
    pub flow_timeout_secs: u64,
    pub sweep_interval_ms: u64,
    /// Longest single wait on an empty queue.
    pub poll_interval_ms: u64,
    /// How long `stop` waits for workers before reporting a leak.
    pub shutdown_grace_ms: u64,
    /// Hand every decoded packet to the sink, not only finished flows.
    pub persist_packets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            flow_timeout_secs: 300,
            sweep_interval_ms: 1_000,
            poll_interval_ms: 100,
            shutdown_grace_ms: 5_000,
            persist_packets: true,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot schedule with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = u64::try_from(self.queue_capacity).unwrap_or(u64::MAX);
        check("queue_capacity", capacity, 1, MAX_QUEUE_CAPACITY)?;
        check("flow_timeout_secs", self.flow_timeout_secs, 1, MAX_FLOW_TIMEOUT_SECS)?;
        check("sweep_interval_ms", self.sweep_interval_ms, 0, MAX_SWEEP_INTERVAL_MS)?;
        check("poll_interval_ms", self.poll_interval_ms, 0, MAX_POLL_INTERVAL_MS)?;
        check("shutdown_grace_ms", self.shutdown_grace_ms, 0, MAX_SHUTDOWN_GRACE_MS)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn check(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.flow_timeout(), Duration::from_secs(300));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert!(config.persist_packets);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = EngineConfig {
            sweep_interval_ms: 0,
            poll_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(serde_json::from_str::<EngineConfig>(r#"{"queue_capacity": "many"}"#).is_err());
    }

    #[test]
    fn defaults_pass_validation() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn oversized_flow_timeout_is_rejected() {
        let config = EngineConfig {
            flow_timeout_secs: 1_000_000_000_000,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "flow_timeout_secs");
        assert_eq!(err.value, 1_000_000_000_000);
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let config = EngineConfig {
            queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError {
                field: "queue_capacity",
                ..
            })
        ));
    }
}
