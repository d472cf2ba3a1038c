//! Configuration types for clusterboot.
//!
//! Configuration is loaded from TOML files, environment variables, and CLI
//! flags by the server crate. All config structs validate their values at
//! construction time via fallible builders. Post-deserialization validation
//! is available via the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod coordination;
mod engine;
mod node;

pub use coordination::*;
pub use engine::*;
pub use node::*;
use snafu::Snafu;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Optional duration serialization using humantime format.
mod humantime_serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    // =========================================================================
    // NodeConfig
    // =========================================================================

    #[test]
    fn test_node_config_defaults_are_valid() {
        let config = NodeConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.lock_path, "/mariadb/bootstrap");
        assert_eq!(config.registry_path, "/mariadb/nodes");
        assert_eq!(config.cluster_name, "lab07");
        assert_eq!(config.max_lock_attempts, 5);
        assert_eq!(config.health_poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_primary_wait, None);
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_node_config_rejects_zero_lock_attempts() {
        let err = NodeConfig::builder().max_lock_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_lock_attempts"));
    }

    #[test]
    fn test_node_config_rejects_relative_paths() {
        let err = NodeConfig::builder().lock_path("mariadb/bootstrap").build().unwrap_err();
        assert!(err.to_string().contains("lock_path"));

        let err = NodeConfig::builder().registry_path("/").build().unwrap_err();
        assert!(err.to_string().contains("registry_path"));
    }

    #[test]
    fn test_node_config_rejects_identical_lock_and_registry_paths() {
        let err = NodeConfig::builder()
            .lock_path("/cluster/a")
            .registry_path("/cluster/a/")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_node_config_rejects_zero_primary_wait() {
        let err = NodeConfig::builder().max_primary_wait(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("max_primary_wait"));

        let config =
            NodeConfig::builder().max_primary_wait(Duration::from_secs(600)).build().unwrap();
        assert_eq!(config.max_primary_wait, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_node_config_retry_policies() {
        let config = NodeConfig::builder().max_lock_attempts(3).build().unwrap();
        assert_eq!(config.lock_policy().max_attempts(), Some(3));
        assert_eq!(config.connect_policy().max_attempts(), None);
        assert_eq!(config.connect_policy().delays().nth(10), Some(Duration::from_secs(3)));
        assert_eq!(config.health_policy().delays().nth(6), Some(Duration::from_secs(2)));
        assert_eq!(config.lock_policy().delays().count(), 2);

        let restarts: Vec<_> = config.restart_policy().delays().take(7).collect();
        assert_eq!(restarts, [3, 6, 12, 24, 48, 60, 60].map(Duration::from_secs));
    }

    #[test]
    fn test_node_config_toml_round_trip_with_humantime() {
        let toml_str = r#"
            lock_path = "/galera/lock"
            registry_path = "/galera/members"
            cluster_name = "prod"
            lock_timeout = "30s"
            max_primary_wait = "10m"

            [coordination]
            hosts = ["etcd-0:2379", "etcd-1:2379"]
            session_ttl = "15s"

            [engine]
            sst_method = "mariabackup"
            root_password = "hunter2"
        "#;
        let config: NodeConfig = toml::from_str(toml_str).expect("parse toml");
        config.validate().expect("valid");
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert_eq!(config.max_primary_wait, Some(Duration::from_secs(600)));
        assert_eq!(config.coordination.hosts.len(), 2);
        assert_eq!(config.coordination.session_ttl, Duration::from_secs(15));
        assert_eq!(config.coordination.connect_retry_delay, Duration::from_secs(3));
        assert_eq!(config.engine.sst_method, "mariabackup");
        assert_eq!(config.engine.root_password.as_ref().map(Secret::expose), Some("hunter2"));

        let rendered = toml::to_string(&config).expect("serialize");
        assert!(rendered.contains("lock_timeout = \"30s\""));
        assert!(!rendered.contains("hunter2"), "secrets are never serialized");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let engine = EngineConfig::builder().root_password(Secret::new("s3cr3t")).build().unwrap();
        let debug = format!("{engine:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("Secret(***)"));
    }

    // =========================================================================
    // CoordinationConfig / EngineConfig
    // =========================================================================

    #[test]
    fn test_coordination_config_rejects_empty_hosts() {
        let err = CoordinationConfig::builder().hosts(vec![]).build().unwrap_err();
        assert!(err.to_string().contains("coordination.hosts"));

        let err = CoordinationConfig::builder().hosts(vec!["  ".to_string()]).build().unwrap_err();
        assert!(err.to_string().contains("coordination.hosts"));
    }

    #[test]
    fn test_coordination_config_session_ttl_minimum() {
        let result = CoordinationConfig::builder().session_ttl(Duration::from_secs(2)).build();
        assert!(result.is_ok());

        let err = CoordinationConfig::builder()
            .session_ttl(Duration::from_millis(1999))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("session_ttl"));
    }

    #[test]
    fn test_coordination_config_rejects_zero_timeouts() {
        let err =
            CoordinationConfig::builder().connect_timeout(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_engine_config_rejects_empty_user() {
        let err = EngineConfig::builder().user("").build().unwrap_err();
        assert!(err.to_string().contains("engine.user"));
    }

    #[test]
    fn test_nested_validation_propagates() {
        let mut config = NodeConfig::default();
        config.engine.status_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.status_timeout"));
    }
}
