//! clusterboot node binary.
//!
//! Starts the local replication engine either as the bootstrap node of a new
//! cluster or as a joiner of the existing members, then supervises it.
//!
//! # Usage
//!
//! ```bash
//! # Join (or bootstrap) through an etcd cluster
//! clusterboot --hosts etcd-0:2379,etcd-1:2379 --ready-file /run/clusterboot/ready
//!
//! # Settings from the environment
//! CLUSTERBOOT__COORDINATION__HOSTS=etcd-0:2379 \
//! CLUSTERBOOT__LOCK_TIMEOUT=20s \
//! clusterboot
//!
//! # Write an example configuration file
//! clusterboot config example > /etc/clusterboot/config.toml
//! ```
//!
//! Exit status: 0 after a requested shutdown, the engine's own status if it
//! exits, 2 for configuration errors, 1 for any other startup failure.

use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use clusterboot_coordination::{Connector, EtcdConnector, InMemoryCoordinator, Session};
use clusterboot_server::{
    MariaDbEngine, NodeBootstrap, SupervisionOutcome,
    address::resolve_node_address,
    config::{
        Cli, CliCommand, ConfigAction, CoordinationBackend, LogFormat, generate_config_example,
        generate_config_schema,
    },
    shutdown,
};
use clusterboot_types::{NodeAddress, config::NodeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status for configuration errors.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI args and env vars (clap handles --help and --version)
    let cli = Cli::parse();

    if let Some(CliCommand::Config { action }) = &cli.command {
        return print_config(*action);
    }

    init_logging(cli.log_format);

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    let address = match resolve_node_address(config.advertise_addr.as_deref()) {
        Ok(address) => address,
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "Cannot determine node address");
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    let cancel = CancellationToken::new();
    let _signals = shutdown::cancel_on_signal(cancel.clone());

    let engine = MariaDbEngine::new(config.engine.clone(), config.cluster_name.clone());
    match cli.coordination_backend {
        CoordinationBackend::Etcd => {
            let connector = EtcdConnector::new(&config.coordination);
            run(config, address, connector, engine, &cancel).await
        },
        CoordinationBackend::Memory => {
            warn!("Using in-memory coordination; other nodes cannot see this one");
            run(config, address, InMemoryCoordinator::new(), engine, &cancel).await
        },
    }
}

/// Runs the startup sequence, then supervises the engine until it exits or
/// shutdown is requested.
async fn run<C: Connector>(
    config: NodeConfig,
    address: NodeAddress,
    connector: C,
    engine: MariaDbEngine,
    cancel: &CancellationToken,
) -> ExitCode {
    let node = NodeBootstrap::new(config, address, connector, engine);

    let started = match node.run(cancel).await {
        Ok(started) => started,
        Err(failure) if failure.is_cancelled() => {
            info!(last_state = %failure.last_state(), "Startup cancelled");
            return ExitCode::SUCCESS;
        },
        Err(failure) => {
            error!(
                last_state = %failure.last_state(),
                kind = %failure.kind(),
                code = failure.kind().as_u16(),
                error = %failure.error(),
                "Node startup failed"
            );
            return ExitCode::FAILURE;
        },
    };

    let outcome = node.supervise(cancel).await;
    started.session.close().await;

    match outcome {
        SupervisionOutcome::Shutdown => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        },
        SupervisionOutcome::EngineExited(code) => {
            warn!(code = ?code, "Replication engine exited");
            code.and_then(|c| u8::try_from(c).ok()).map_or(ExitCode::FAILURE, ExitCode::from)
        },
    }
}

fn print_config(action: ConfigAction) -> ExitCode {
    let rendered = match action {
        ConfigAction::Schema => generate_config_schema().map_err(|e| e.to_string()),
        ConfigAction::Example => generate_config_example().map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("failed to render configuration: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Initializes the logging system.
///
/// Supports three formats:
/// - `Text`: Human-readable format (development)
/// - `Json`: JSON structured logging (production)
/// - `Auto`: JSON for non-TTY stdout, text otherwise
fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}
