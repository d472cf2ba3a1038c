//! Command-line interface and configuration loading.
//!
//! Node settings are layered, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `/etc/clusterboot/config.toml` if present)
//! 3. `CLUSTERBOOT__*` environment variables, `__` separating nested keys
//!    (e.g. `CLUSTERBOOT__COORDINATION__HOSTS=etcd-0:2379,etcd-1:2379`)
//! 4. Command-line flags
//!
//! The merged result is validated before the node starts.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use clusterboot_types::{BootstrapError, config::NodeConfig};
use snafu::{ResultExt, Snafu};

/// Environment variable prefix for node settings.
pub const ENV_PREFIX: &str = "CLUSTERBOOT";

const DEFAULT_CONFIG_FILE: &str = "/etc/clusterboot/config.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// One JSON object per line.
    Json,
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
}

/// Coordination service implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CoordinationBackend {
    /// etcd cluster at `coordination.hosts`.
    #[default]
    Etcd,
    /// Process-local coordinator. Only meaningful for a single node.
    Memory,
}

/// Bootstraps or joins a replicated database cluster.
#[derive(Debug, Parser)]
#[command(name = "clusterboot", version, about)]
pub struct Cli {
    /// Utility subcommand. Without one the node starts.
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// TOML configuration file.
    #[arg(long = "config", env = "CLUSTERBOOT__CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "CLUSTERBOOT__LOG_FORMAT", value_enum, default_value_t = LogFormat::Auto)]
    pub log_format: LogFormat,

    /// Coordination service implementation.
    #[arg(
        long,
        env = "CLUSTERBOOT__COORDINATION_BACKEND",
        value_enum,
        default_value_t = CoordinationBackend::Etcd
    )]
    pub coordination_backend: CoordinationBackend,

    /// Coordination service endpoints, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Name of the bootstrap lock.
    #[arg(long)]
    pub lock_path: Option<String>,

    /// Parent path of the membership registry.
    #[arg(long)]
    pub registry_path: Option<String>,

    /// Cluster name passed to the engine.
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Bound on a single lock-acquire attempt (e.g. `10s`).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub lock_timeout: Option<Duration>,

    /// Lock-acquire attempts before giving up.
    #[arg(long)]
    pub max_lock_attempts: Option<u32>,

    /// Interval between engine status queries (e.g. `2s`).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub health_poll_interval: Option<Duration>,

    /// Give up waiting for primary status after this long.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_primary_wait: Option<Duration>,

    /// Address to register and advertise instead of the discovered one.
    #[arg(long)]
    pub advertise_addr: Option<String>,

    /// File written once the engine reports primary status.
    #[arg(long)]
    pub ready_file: Option<PathBuf>,
}

/// Utility subcommands.
#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Configuration tooling.
    Config {
        /// What to print.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration tooling actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the JSON Schema of the configuration file.
    Schema,
    /// Print an example configuration file with every default.
    Example,
}

/// Error loading the node configuration.
#[derive(Debug, Snafu)]
pub enum ConfigLoadError {
    /// A source could not be read or deserialized.
    #[snafu(display("failed to load configuration: {source}"))]
    Load {
        /// Underlying loader error.
        source: config::ConfigError,
    },
    /// The merged configuration failed validation.
    #[snafu(display("{source}"))]
    Invalid {
        /// Validation failure.
        source: clusterboot_types::config::ConfigError,
    },
}

impl From<ConfigLoadError> for BootstrapError {
    fn from(err: ConfigLoadError) -> Self {
        BootstrapError::Config { message: err.to_string() }
    }
}

impl Cli {
    /// Loads the node configuration from every source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError`] if a source is unreadable or the merged
    /// configuration is invalid.
    pub fn load_config(&self) -> Result<NodeConfig, ConfigLoadError> {
        self.load_config_from(None)
    }

    /// Loads the configuration, reading environment variables from `env`
    /// instead of the process environment when given.
    pub(crate) fn load_config_from(
        &self,
        env: Option<config::Map<String, String>>,
    ) -> Result<NodeConfig, ConfigLoadError> {
        let file = match &self.config_file {
            Some(path) => config::File::from(path.as_path()).format(config::FileFormat::Toml),
            None => {
                config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml).required(false)
            },
        };

        let mut node: NodeConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("coordination.hosts")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context(LoadSnafu)?
            .try_deserialize()
            .context(LoadSnafu)?;

        self.apply_overrides(&mut node);
        node.validate().context(InvalidSnafu)?;
        Ok(node)
    }

    fn apply_overrides(&self, node: &mut NodeConfig) {
        if !self.hosts.is_empty() {
            node.coordination.hosts.clone_from(&self.hosts);
        }
        if let Some(lock_path) = &self.lock_path {
            node.lock_path.clone_from(lock_path);
        }
        if let Some(registry_path) = &self.registry_path {
            node.registry_path.clone_from(registry_path);
        }
        if let Some(cluster_name) = &self.cluster_name {
            node.cluster_name.clone_from(cluster_name);
        }
        if let Some(lock_timeout) = self.lock_timeout {
            node.lock_timeout = lock_timeout;
        }
        if let Some(attempts) = self.max_lock_attempts {
            node.max_lock_attempts = attempts;
        }
        if let Some(interval) = self.health_poll_interval {
            node.health_poll_interval = interval;
        }
        if self.max_primary_wait.is_some() {
            node.max_primary_wait = self.max_primary_wait;
        }
        if self.advertise_addr.is_some() {
            node.advertise_addr.clone_from(&self.advertise_addr);
        }
        if self.ready_file.is_some() {
            node.ready_file.clone_from(&self.ready_file);
        }
    }
}

/// Renders the JSON Schema of the configuration file.
///
/// # Errors
///
/// Returns an error if the schema cannot be serialized.
pub fn generate_config_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(NodeConfig);
    serde_json::to_string_pretty(&schema)
}

/// Renders a TOML configuration file holding every default value.
///
/// # Errors
///
/// Returns an error if the defaults cannot be serialized.
pub fn generate_config_example() -> Result<String, toml::ser::Error> {
    let body = toml::to_string_pretty(&NodeConfig::default())?;
    Ok(format!(
        "# clusterboot configuration\n\
         # Environment variables override these values, e.g. CLUSTERBOOT__LOCK_TIMEOUT=20s.\n\n\
         {body}"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use clusterboot_test_utils::TestDir;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("clusterboot").chain(args.iter().copied())).unwrap()
    }

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    fn write_config(dir: &TestDir, contents: &str) -> String {
        dir.write_config(contents).display().to_string()
    }

    #[test]
    fn test_defaults_without_sources() {
        let dir = TestDir::new();
        let path = write_config(&dir, "");
        let config = cli(&["--config", &path]).load_config_from(env(&[])).unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_file_values() {
        let dir = TestDir::new();
        let path = write_config(
            &dir,
            r#"
lock_path = "/galera/prod/bootstrap"
registry_path = "/galera/prod/nodes"
lock_timeout = "3s"
max_primary_wait = "5m"

[coordination]
hosts = ["etcd-0:2379", "etcd-1:2379"]
session_ttl = "15s"

[engine]
sst_method = "mariabackup"
"#,
        );

        let config = cli(&["--config", &path]).load_config_from(env(&[])).unwrap();
        assert_eq!(config.lock_path, "/galera/prod/bootstrap");
        assert_eq!(config.registry_path, "/galera/prod/nodes");
        assert_eq!(config.lock_timeout, Duration::from_secs(3));
        assert_eq!(config.max_primary_wait, Some(Duration::from_secs(300)));
        assert_eq!(config.coordination.hosts, vec!["etcd-0:2379", "etcd-1:2379"]);
        assert_eq!(config.coordination.session_ttl, Duration::from_secs(15));
        assert_eq!(config.engine.sst_method, "mariabackup");
        assert_eq!(config.cluster_name, "lab07");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TestDir::new();
        let path = write_config(&dir, "lock_timeout = \"3s\"\nmax_lock_attempts = 8\n");

        let config = cli(&["--config", &path])
            .load_config_from(env(&[
                ("CLUSTERBOOT__LOCK_TIMEOUT", "7s"),
                ("CLUSTERBOOT__COORDINATION__HOSTS", "etcd-a:2379,etcd-b:2379"),
                ("CLUSTERBOOT__ENGINE__GTID_DOMAIN_ID", "4"),
                ("UNRELATED", "ignored"),
            ]))
            .unwrap();

        assert_eq!(config.lock_timeout, Duration::from_secs(7));
        assert_eq!(config.max_lock_attempts, 8);
        assert_eq!(config.coordination.hosts, vec!["etcd-a:2379", "etcd-b:2379"]);
        assert_eq!(config.engine.gtid_domain_id, 4);
    }

    #[test]
    fn test_cli_overrides_env() {
        let dir = TestDir::new();
        let path = write_config(&dir, "");

        let config = cli(&[
            "--config",
            &path,
            "--hosts",
            "etcd-x:2379,etcd-y:2379",
            "--lock-timeout",
            "20s",
            "--max-lock-attempts",
            "2",
            "--advertise-addr",
            "10.1.0.5",
            "--ready-file",
            "/run/clusterboot/ready",
        ])
        .load_config_from(env(&[
            ("CLUSTERBOOT__LOCK_TIMEOUT", "7s"),
            ("CLUSTERBOOT__MAX_LOCK_ATTEMPTS", "9"),
        ]))
        .unwrap();

        assert_eq!(config.coordination.hosts, vec!["etcd-x:2379", "etcd-y:2379"]);
        assert_eq!(config.lock_timeout, Duration::from_secs(20));
        assert_eq!(config.max_lock_attempts, 2);
        assert_eq!(config.advertise_addr.as_deref(), Some("10.1.0.5"));
        assert_eq!(config.ready_file, Some(PathBuf::from("/run/clusterboot/ready")));
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let dir = TestDir::new();
        let path = write_config(&dir, "");

        let err = cli(&["--config", &path, "--max-lock-attempts", "0"])
            .load_config_from(env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid { .. }), "{err}");
        assert!(err.to_string().contains("max_lock_attempts"), "{err}");

        let bootstrap: BootstrapError = err.into();
        assert_eq!(bootstrap.kind(), clusterboot_types::ErrorKind::Config);
    }

    #[test]
    fn test_malformed_duration_rejected() {
        let dir = TestDir::new();
        let path = write_config(&dir, "lock_timeout = \"soon\"\n");
        let err = cli(&["--config", &path]).load_config_from(env(&[])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load { .. }), "{err}");
    }

    #[test]
    fn test_missing_explicit_file_rejected() {
        let dir = TestDir::new();
        let path = dir.join("absent.toml").display().to_string();
        let err = cli(&["--config", &path]).load_config_from(env(&[])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load { .. }), "{err}");
    }

    #[test]
    fn test_cli_flags_parse() {
        let parsed = cli(&["--log-format", "json", "--coordination-backend", "memory"]);
        assert_eq!(parsed.log_format, LogFormat::Json);
        assert_eq!(parsed.coordination_backend, CoordinationBackend::Memory);
        assert!(parsed.command.is_none());

        let parsed = cli(&["config", "schema"]);
        assert!(matches!(
            parsed.command,
            Some(CliCommand::Config { action: ConfigAction::Schema })
        ));

        assert!(Cli::try_parse_from(["clusterboot", "--lock-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_schema_lists_settings() {
        let schema = generate_config_schema().unwrap();
        let value: serde_json::Value = serde_json::from_str(&schema).unwrap();
        let properties = &value["properties"];
        for key in ["coordination", "lock_path", "registry_path", "max_primary_wait", "engine"] {
            assert!(properties.get(key).is_some(), "schema missing {key}");
        }
    }

    #[test]
    fn test_example_round_trips_to_defaults() {
        let example = generate_config_example().unwrap();
        assert!(example.contains("lock_path = \"/mariadb/bootstrap\""), "{example}");
        let parsed: NodeConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed, NodeConfig::default());
    }
}
