//! Replication engine (MariaDB/Galera) launch configuration.

use std::{fmt, path::PathBuf, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// A secret passed through to the engine without being interpreted or logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("mysqld")
}

fn default_client_binary() -> PathBuf {
    PathBuf::from("mysql")
}

fn default_user() -> String {
    "mysql".to_string()
}

fn default_provider() -> PathBuf {
    PathBuf::from("/usr/lib/galera/libgalera_smm.so")
}

fn default_sst_method() -> String {
    "rsync".to_string()
}

const fn default_gtid_domain_id() -> u32 {
    1
}

/// Default window in which an exiting engine counts as a failed launch (1s).
fn default_launch_grace() -> Duration {
    Duration::from_secs(1)
}

/// Default bound on a single status query (5s).
fn default_status_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Settings for launching and querying the replication engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Engine server binary.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Client binary used for status queries.
    #[serde(default = "default_client_binary")]
    pub client_binary: PathBuf,
    /// OS user the engine runs as.
    #[serde(default = "default_user")]
    pub user: String,
    /// Path to the write-set replication provider library.
    #[serde(default = "default_provider")]
    pub provider: PathBuf,
    /// State snapshot transfer method.
    #[serde(default = "default_sst_method")]
    pub sst_method: String,
    /// GTID domain shared by every node of the cluster.
    #[serde(default = "default_gtid_domain_id")]
    pub gtid_domain_id: u32,
    /// An engine that exits within this window is a failed launch.
    #[serde(default = "default_launch_grace")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub launch_grace: Duration,
    /// Bound on a single status query.
    #[serde(default = "default_status_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub status_timeout: Duration,
    /// Root password for status queries. Falls back to `MYSQL_ROOT_PASSWORD`.
    #[serde(default, skip_serializing)]
    pub root_password: Option<Secret>,
    /// Extra arguments appended to the engine command line.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[bon::bon]
impl EngineConfig {
    /// Creates a new engine configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a required string is empty or
    /// `status_timeout` is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_binary(), into)] binary: PathBuf,
        #[builder(default = default_client_binary(), into)] client_binary: PathBuf,
        #[builder(default = default_user(), into)] user: String,
        #[builder(default = default_provider(), into)] provider: PathBuf,
        #[builder(default = default_sst_method(), into)] sst_method: String,
        #[builder(default = default_gtid_domain_id())] gtid_domain_id: u32,
        #[builder(default = default_launch_grace())] launch_grace: Duration,
        #[builder(default = default_status_timeout())] status_timeout: Duration,
        root_password: Option<Secret>,
        #[builder(default)] extra_args: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            binary,
            client_binary,
            user,
            provider,
            sst_method,
            gtid_domain_id,
            launch_grace,
            status_timeout,
            root_password,
            extra_args,
        };
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary.as_os_str().is_empty() || self.client_binary.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "engine.binary and engine.client_binary must be set".to_string(),
            });
        }
        if self.user.is_empty() {
            return Err(ConfigError::Validation {
                message: "engine.user must not be empty".to_string(),
            });
        }
        if self.sst_method.is_empty() {
            return Err(ConfigError::Validation {
                message: "engine.sst_method must not be empty".to_string(),
            });
        }
        if self.status_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "engine.status_timeout must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            client_binary: default_client_binary(),
            user: default_user(),
            provider: default_provider(),
            sst_method: default_sst_method(),
            gtid_domain_id: default_gtid_domain_id(),
            launch_grace: default_launch_grace(),
            status_timeout: default_status_timeout(),
            root_password: None,
            extra_args: Vec::new(),
        }
    }
}
