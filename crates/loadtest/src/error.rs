//! Load test errors.

use std::path::PathBuf;

use snafu::Snafu;

/// Errors raised by the load test harness.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadTestError {
    /// The request payload file is unreadable.
    #[snafu(display("cannot read payload {}: {source}", path.display()))]
    Payload {
        /// Payload path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An output file or directory could not be written.
    #[snafu(display("cannot write {}: {source}", path.display()))]
    Output {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An external program could not be started.
    #[snafu(display("failed to run {program}: {source}"))]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[snafu(display("{program} exited with {status}"))]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status and stderr summary.
        status: String,
    },

    /// `kubectl` printed something that is not JSON.
    #[snafu(display("invalid JSON from {program}: {source}"))]
    Json {
        /// Program name.
        program: String,
        /// Decode error.
        source: serde_json::Error,
    },

    /// A Kubernetes object lacks a field that appears once it is ready.
    #[snafu(display("{object} has no {field}"))]
    MissingField {
        /// Object description.
        object: String,
        /// JSON pointer of the missing field.
        field: String,
    },

    /// The deployment has not converged on the requested replica count.
    #[snafu(display("expected {expected} ready replicas, found {ready}"))]
    ReplicaMismatch {
        /// Requested replicas.
        expected: u32,
        /// Ready replicas reported.
        ready: u32,
    },

    /// ApacheBench output lacks a statistic.
    #[snafu(display("ab output has no {field} line"))]
    AbOutput {
        /// Missing statistic.
        field: &'static str,
    },

    /// A CSV report could not be written.
    #[snafu(display("cannot write CSV {}: {source}", path.display()))]
    Csv {
        /// Report path.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A JSON report could not be encoded.
    #[snafu(display("cannot encode {}: {source}", path.display()))]
    Encode {
        /// Report path.
        path: PathBuf,
        /// Encode error.
        source: serde_json::Error,
    },
}

/// Result type for the load test harness.
pub type Result<T, E = LoadTestError> = std::result::Result<T, E>;
