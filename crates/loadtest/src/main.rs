//! Load test binary.
//!
//! ```bash
//! clusterboot-loadtest --endpoint transfer --replicas 1 2 4 \
//!     --payload transfer.json --tag transfer
//! ```
//!
//! Requires `kubectl` configured for the target cluster and `ab` on `PATH`.

use std::process::ExitCode;

use clap::Parser;
use clusterboot_loadtest::{LoadTest, LoadTestArgs, ProcessRunner};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let args = LoadTestArgs::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();

    match LoadTest::new(args, ProcessRunner).run().await {
        Ok(files) => {
            info!(files = files.len(), "Load test complete");
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!(error = %e, "Load test failed");
            ExitCode::FAILURE
        },
    }
}
