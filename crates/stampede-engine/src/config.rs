use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

fn default_lock_ttl_ms() -> u64 {
    10_000
}
fn default_node_timeout_ms() -> u64 {
    1_000
}
fn default_drift_factor() -> f64 {
    0.01
}
fn default_drift_floor_ms() -> u64 {
    2
}
fn default_max_retries() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    20
}
fn default_max_delay_ms() -> u64 {
    500
}
fn default_safety_margin_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one coordination node must be configured")]
    NoNodes,

    #[error("node_timeout_ms {node_timeout_ms} must be at most lock_ttl_ms / 10 ({limit_ms})")]
    NodeTimeoutTooLarge { node_timeout_ms: u64, limit_ms: u64 },

    #[error("safety_margin_ms {safety_margin_ms} must be below lock_ttl_ms {lock_ttl_ms}")]
    SafetyMarginTooLarge {
        safety_margin_ms: u64,
        lock_ttl_ms: u64,
    },

    #[error("base_delay_ms {base_delay_ms} must not exceed max_delay_ms {max_delay_ms}")]
    BackoffRangeInverted {
        base_delay_ms: u64,
        max_delay_ms: u64,
    },

    #[error("max_retries must be at least 1")]
    NoAttempts,
}

/// Engine configuration. Constructed once at startup and passed explicitly;
/// nothing in the engine reads process-wide mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quorum (Redlock) over all `nodes`, or single-node on the first entry.
    #[serde(default)]
    pub use_quorum: bool,

    /// Coordination nodes as `host:port`. N = nodes.len().
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Lock time-to-live.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Per-node RPC budget. Must stay at most a tenth of the TTL so a slow
    /// round cannot consume the validity window.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// Clock-drift factor applied to the TTL when computing validity.
    #[serde(default = "default_drift_factor")]
    pub drift_factor: f64,

    /// Minimum drift allowance, in milliseconds.
    #[serde(default = "default_drift_floor_ms")]
    pub drift_floor_ms: u64,

    /// Total lock acquisition attempts before giving up with `Busy`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff floor between acquisition attempts.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling between acquisition attempts.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Minimum remaining validity required to start the next critical-section
    /// step; below it the reservation aborts and rolls back.
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            use_quorum: false,
            nodes: Vec::new(),
            lock_ttl_ms: default_lock_ttl_ms(),
            node_timeout_ms: default_node_timeout_ms(),
            drift_factor: default_drift_factor(),
            drift_floor_ms: default_drift_floor_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            safety_margin_ms: default_safety_margin_ms(),
        }
    }
}

impl EngineConfig {
    /// Check the parameter relationships the locking math depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let limit_ms = self.lock_ttl_ms / 10;
        if self.node_timeout_ms > limit_ms {
            return Err(ConfigError::NodeTimeoutTooLarge {
                node_timeout_ms: self.node_timeout_ms,
                limit_ms,
            });
        }
        if self.safety_margin_ms >= self.lock_ttl_ms {
            return Err(ConfigError::SafetyMarginTooLarge {
                safety_margin_ms: self.safety_margin_ms,
                lock_ttl_ms: self.lock_ttl_ms,
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::BackoffRangeInverted {
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        // Tuning guidance, not a hard error: the whole retry budget should
        // stay well inside whatever the client-facing timeout is.
        let retry_budget_ms = u64::from(self.max_retries) * self.max_delay_ms;
        if retry_budget_ms > self.lock_ttl_ms {
            warn!(
                "retry budget {retry_budget_ms} ms exceeds lock_ttl_ms {}; \
                 callers may wait longer on contention than a lock lives",
                self.lock_ttl_ms
            );
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn drift_floor(&self) -> Duration {
        Duration::from_millis(self.drift_floor_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}
