//! Coordination service connection configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

fn default_hosts() -> Vec<String> {
    vec!["localhost:2379".to_string()]
}

/// Default session TTL (10s).
fn default_session_ttl() -> Duration {
    Duration::from_secs(10)
}

/// Default per-attempt connect timeout (5s).
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Default delay between connect attempts (3s).
fn default_connect_retry_delay() -> Duration {
    Duration::from_secs(3)
}

/// Default per-request timeout for registry reads and writes (5s).
fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Sessions shorter than this cannot be kept alive reliably.
const MIN_SESSION_TTL: Duration = Duration::from_secs(2);

/// Connection settings for the coordination service.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use clusterboot_types::config::CoordinationConfig;
/// let config = CoordinationConfig::builder()
///     .hosts(vec!["etcd-0:2379".to_string(), "etcd-1:2379".to_string()])
///     .session_ttl(Duration::from_secs(15))
///     .build()
///     .expect("valid coordination config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CoordinationConfig {
    /// Coordination service endpoints (`host:port`).
    ///
    /// Must contain at least one non-empty entry.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Session lifetime without keep-alive. Ephemeral registry entries and
    /// held locks disappear this long after the node dies.
    ///
    /// Must be >= 2s.
    #[serde(default = "default_session_ttl")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub session_ttl: Duration,
    /// Bound on a single connection attempt.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub connect_timeout: Duration,
    /// Fixed delay between failed connection attempts.
    #[serde(default = "default_connect_retry_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub connect_retry_delay: Duration,
    /// Bound on a single registry read or write.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub request_timeout: Duration,
}

#[bon::bon]
impl CoordinationConfig {
    /// Creates a new coordination configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `hosts` is empty, any timeout is
    /// zero, or `session_ttl` is below 2s.
    #[builder]
    pub fn new(
        #[builder(default = default_hosts())] hosts: Vec<String>,
        #[builder(default = default_session_ttl())] session_ttl: Duration,
        #[builder(default = default_connect_timeout())] connect_timeout: Duration,
        #[builder(default = default_connect_retry_delay())] connect_retry_delay: Duration,
        #[builder(default = default_request_timeout())] request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { hosts, session_ttl, connect_timeout, connect_retry_delay, request_timeout };
        config.validate()?;
        Ok(config)
    }
}

impl CoordinationConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: "coordination.hosts must list at least one non-empty endpoint"
                    .to_string(),
            });
        }
        if self.session_ttl < MIN_SESSION_TTL {
            return Err(ConfigError::Validation {
                message: format!(
                    "coordination.session_ttl must be >= {}",
                    humantime::format_duration(MIN_SESSION_TTL)
                ),
            });
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("connect_retry_delay", self.connect_retry_delay),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Validation {
                    message: format!("coordination.{name} must be > 0"),
                });
            }
        }
        Ok(())
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            session_ttl: default_session_ttl(),
            connect_timeout: default_connect_timeout(),
            connect_retry_delay: default_connect_retry_delay(),
            request_timeout: default_request_timeout(),
        }
    }
}
