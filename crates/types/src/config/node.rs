use std::{path::PathBuf, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, CoordinationConfig, EngineConfig};
use crate::retry::{Backoff, RetryPolicy};

fn default_lock_path() -> String {
    "/mariadb/bootstrap".to_string()
}

fn default_registry_path() -> String {
    "/mariadb/nodes".to_string()
}

fn default_cluster_name() -> String {
    "lab07".to_string()
}

/// Default per-attempt lock wait (10s).
fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_lock_attempts() -> u32 {
    5
}

/// Cap on the delay between session restarts.
const MAX_RESTART_DELAY: Duration = Duration::from_secs(60);

/// Default health poll interval (2s).
fn default_health_poll_interval() -> Duration {
    Duration::from_secs(2)
}

/// Main configuration for a bootstrapping node.
///
/// Lock and registry paths are injected here rather than fixed in code so
/// several clusters can share one coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeConfig {
    /// Coordination service connection.
    #[serde(default)]
    pub coordination: CoordinationConfig,
    /// Name of the bootstrap lock.
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
    /// Parent path of the membership registry.
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
    /// Cluster name passed to the engine.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Bound on a single lock-acquire attempt.
    #[serde(default = "default_lock_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub lock_timeout: Duration,
    /// Lock-acquire attempts before giving up with a bootstrap failure.
    ///
    /// Must be >= 1.
    #[serde(default = "default_max_lock_attempts")]
    pub max_lock_attempts: u32,
    /// Interval between engine status queries.
    #[serde(default = "default_health_poll_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub health_poll_interval: Duration,
    /// Give up waiting for primary status after this long. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "super::humantime_serde_opt")]
    #[schemars(with = "Option<String>")]
    pub max_primary_wait: Option<Duration>,
    /// Address to register and advertise. Discovered from the host's
    /// interfaces when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    /// File written once the engine reports primary status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_file: Option<PathBuf>,
    /// Replication engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

#[bon::bon]
impl NodeConfig {
    /// Creates a new node configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range or a
    /// nested configuration is invalid.
    #[builder]
    pub fn new(
        #[builder(default)] coordination: CoordinationConfig,
        #[builder(default = default_lock_path(), into)] lock_path: String,
        #[builder(default = default_registry_path(), into)] registry_path: String,
        #[builder(default = default_cluster_name(), into)] cluster_name: String,
        #[builder(default = default_lock_timeout())] lock_timeout: Duration,
        #[builder(default = default_max_lock_attempts())] max_lock_attempts: u32,
        #[builder(default = default_health_poll_interval())] health_poll_interval: Duration,
        max_primary_wait: Option<Duration>,
        #[builder(into)] advertise_addr: Option<String>,
        #[builder(into)] ready_file: Option<PathBuf>,
        #[builder(default)] engine: EngineConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            coordination,
            lock_path,
            registry_path,
            cluster_name,
            lock_timeout,
            max_lock_attempts,
            health_poll_interval,
            max_primary_wait,
            advertise_addr,
            ready_file,
            engine,
        };
        config.validate()?;
        Ok(config)
    }
}

impl NodeConfig {
    /// Validates the configuration values, including nested sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordination.validate()?;
        self.engine.validate()?;
        validate_path("lock_path", &self.lock_path)?;
        validate_path("registry_path", &self.registry_path)?;
        if self.lock_path.trim_end_matches('/') == self.registry_path.trim_end_matches('/') {
            return Err(ConfigError::Validation {
                message: "lock_path and registry_path must differ".to_string(),
            });
        }
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "cluster_name must not be empty".to_string(),
            });
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "lock_timeout must be > 0".to_string(),
            });
        }
        if self.max_lock_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_lock_attempts must be >= 1".to_string(),
            });
        }
        if self.health_poll_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "health_poll_interval must be > 0".to_string(),
            });
        }
        if self.max_primary_wait.is_some_and(|wait| wait.is_zero()) {
            return Err(ConfigError::Validation {
                message: "max_primary_wait must be > 0 when set".to_string(),
            });
        }
        if self.advertise_addr.as_deref().is_some_and(|addr| addr.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: "advertise_addr must not be empty when set".to_string(),
            });
        }
        Ok(())
    }

    /// Retry policy for establishing a coordination session: forever, fixed delay.
    #[must_use]
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.coordination.connect_retry_delay)
    }

    /// Retry policy for restarting the sequence after the session fails before
    /// the decision commits: forever, doubling from `connect_retry_delay` up to
    /// a minute.
    #[must_use]
    pub fn restart_policy(&self) -> RetryPolicy {
        let initial = self.coordination.connect_retry_delay;
        RetryPolicy::unbounded(initial).with_backoff(Backoff::Exponential {
            initial,
            max: MAX_RESTART_DELAY.max(initial),
            multiplier: 2.0,
        })
    }

    /// Retry policy for the bootstrap lock: `max_lock_attempts`, no extra delay
    /// since each attempt already waits `lock_timeout`.
    #[must_use]
    pub fn lock_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.max_lock_attempts, Duration::ZERO)
    }

    /// Retry policy for health polling: forever, every `health_poll_interval`.
    #[must_use]
    pub fn health_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.health_poll_interval)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            coordination: CoordinationConfig::default(),
            lock_path: default_lock_path(),
            registry_path: default_registry_path(),
            cluster_name: default_cluster_name(),
            lock_timeout: default_lock_timeout(),
            max_lock_attempts: default_max_lock_attempts(),
            health_poll_interval: default_health_poll_interval(),
            max_primary_wait: None,
            advertise_addr: None,
            ready_file: None,
            engine: EngineConfig::default(),
        }
    }
}

fn validate_path(name: &str, path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') || path.trim_end_matches('/').is_empty() {
        return Err(ConfigError::Validation {
            message: format!("{name} must be an absolute path below '/', got {path:?}"),
        });
    }
    Ok(())
}
