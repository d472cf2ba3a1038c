//! Throughput sweep for a Kubernetes deployment.
//!
//! For each requested replica count the deployment is scaled, the harness
//! waits until every replica is ready, and ApacheBench runs at a series of
//! concurrency levels against the service's external address. Results land in
//! `<out_dir>/<tag>_<replicas>.csv` and `.json`.

#![deny(unsafe_code)]

pub mod ab;
pub mod error;
pub mod kube;
pub mod report;
pub mod runner;

use std::{path::PathBuf, time::Duration};

use backon::{ConstantBuilder, Retryable};
use clap::Parser;
pub use error::{LoadTestError, Result};
use error::{OutputSnafu, PayloadSnafu, ReplicaMismatchSnafu};
pub use runner::{CommandRunner, ProcessRunner};
use snafu::ResultExt;
use tracing::{info, warn};

use crate::{ab::LevelResult, kube::KUBECTL};

const AB: &str = "ab";

/// Measures request throughput of a deployment at several replica counts.
#[derive(Debug, Clone, Parser)]
#[command(name = "clusterboot-loadtest", version, about)]
pub struct LoadTestArgs {
    /// Endpoint path requested on the service.
    #[arg(long)]
    pub endpoint: String,

    /// Replica counts to measure, in order.
    #[arg(long, num_args = 1.., required = true)]
    pub replicas: Vec<u32>,

    /// Prefix of the result file names.
    #[arg(long, default_value = "results")]
    pub tag: String,

    /// JSON request body sent with every request.
    #[arg(long)]
    pub payload: PathBuf,

    /// Service whose load balancer receives the requests.
    #[arg(long, default_value = "minibank")]
    pub service: String,

    /// Deployment to scale.
    #[arg(long, default_value = "minibank")]
    pub deployment: String,

    /// Directory for result files.
    #[arg(long, default_value = "results")]
    pub out_dir: PathBuf,

    /// Service port.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

/// Attempt limits for the external steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Attempts at reading the service address and the ready replica count.
    pub lookup_attempts: usize,
    /// Delay between lookup attempts.
    pub lookup_delay: Duration,
    /// Attempts per `ab` run.
    pub ab_attempts: usize,
    /// Delay between `ab` attempts.
    pub ab_delay: Duration,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            lookup_attempts: 20,
            lookup_delay: Duration::from_secs(5),
            ab_attempts: 5,
            ab_delay: Duration::from_secs(1),
        }
    }
}

fn constant(attempts: usize, delay: Duration) -> ConstantBuilder {
    // backon counts retries, not attempts.
    ConstantBuilder::default().with_delay(delay).with_max_times(attempts.saturating_sub(1))
}

/// A configured load test run.
pub struct LoadTest<R> {
    args: LoadTestArgs,
    runner: R,
    limits: RetryLimits,
}

impl<R: CommandRunner> LoadTest<R> {
    /// Creates a run with the default retry limits.
    pub fn new(args: LoadTestArgs, runner: R) -> Self {
        Self { args, runner, limits: RetryLimits::default() }
    }

    /// Overrides the retry limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs the sweep and returns the report files written.
    ///
    /// # Errors
    ///
    /// Returns the first error that survives its retries.
    pub async fn run(&self) -> Result<Vec<PathBuf>> {
        tokio::fs::File::open(&self.args.payload)
            .await
            .context(PayloadSnafu { path: &self.args.payload })?;
        tokio::fs::create_dir_all(&self.args.out_dir)
            .await
            .context(OutputSnafu { path: &self.args.out_dir })?;

        let ip = self.service_ip().await?;
        let url = format!(
            "http://{ip}:{}/{}",
            self.args.port,
            self.args.endpoint.trim_start_matches('/')
        );
        info!(service = %self.args.service, url = %url, "Resolved service address");

        let mut written = Vec::new();
        for &replicas in &self.args.replicas {
            self.scale(replicas).await?;
            self.wait_for_replicas(replicas).await?;
            info!(replicas, "Collecting statistics");

            let mut results = Vec::with_capacity(ab::LEVELS.len());
            for (con_level, requests) in ab::LEVELS {
                info!(replicas, con_level, requests, "Running ab");
                results.push(self.run_level(&url, con_level, requests).await?);
            }

            let (csv, json) =
                report::write_reports(&self.args.out_dir, &self.args.tag, replicas, &results)?;
            info!(replicas, csv = %csv.display(), json = %json.display(), "Wrote results");
            written.extend([csv, json]);
        }
        Ok(written)
    }

    async fn service_ip(&self) -> Result<String> {
        let args = kube::get_service_args(&self.args.service);
        let args = &args;
        (|| async move {
            let output = self.runner.output(KUBECTL, args).await?;
            kube::parse_service_ip(&self.args.service, &output)
        })
        .retry(constant(self.limits.lookup_attempts, self.limits.lookup_delay))
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, LoadTestError::MissingField { .. }))
        .notify(|e, delay| warn!(error = %e, retry_in = ?delay, "Service address not ready"))
        .await
    }

    async fn scale(&self, replicas: u32) -> Result<()> {
        info!(deployment = %self.args.deployment, replicas, "Scaling deployment");
        let args = kube::scale_args(&self.args.deployment, replicas);
        self.runner.output(KUBECTL, &args).await.map(|_| ())
    }

    async fn wait_for_replicas(&self, replicas: u32) -> Result<()> {
        let args = kube::get_deployment_args(&self.args.deployment);
        let args = &args;
        (|| async move {
            let output = self.runner.output(KUBECTL, args).await?;
            let ready = kube::parse_ready_replicas(&output)?;
            if ready == replicas {
                Ok(())
            } else {
                ReplicaMismatchSnafu { expected: replicas, ready }.fail()
            }
        })
        .retry(constant(self.limits.lookup_attempts, self.limits.lookup_delay))
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, LoadTestError::ReplicaMismatch { .. }))
        .notify(|e, delay| info!(error = %e, retry_in = ?delay, "Waiting for replicas"))
        .await
    }

    async fn run_level(&self, url: &str, con_level: u32, requests: u32) -> Result<LevelResult> {
        let payload = self.args.payload.display().to_string();
        let args = ab::ab_args(&payload, requests, con_level, url);
        let args = &args;
        let output = (|| async move { self.runner.output(AB, args).await })
            .retry(constant(self.limits.ab_attempts, self.limits.ab_delay))
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, LoadTestError::CommandFailed { .. }))
            .notify(|e, delay| warn!(error = %e, retry_in = ?delay, "ab failed"))
            .await?;
        ab::parse_ab_output(con_level, &output)
    }
}
