//! Error types for clusterboot using snafu.
//!
//! Every failure a node can hit during startup belongs to one of a closed set
//! of [`ErrorKind`]s. Transient kinds are absorbed by the component that sees
//! them (retried); fatal kinds propagate to the process boundary wrapped in a
//! [`StartupFailure`] that records the state the node was in.

use core::fmt;

use snafu::{Location, Snafu};

use crate::types::ClusterState;

/// Unified result type for bootstrap operations.
pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

/// Closed set of error kinds.
///
/// | Range   | Domain       |
/// |---------|--------------|
/// | 100–199 | Coordination |
/// | 200–299 | Startup      |
/// | 300–399 | Local        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    /// The coordination service could not be reached.
    CoordinationUnavailable = 100,
    /// A single lock-acquire attempt exceeded its timeout.
    LockTimeout = 101,
    /// The coordination session expired or was closed.
    SessionLost = 102,
    /// Lock-acquire attempts were exhausted.
    BootstrapFailure = 200,
    /// The replication engine could not be launched or exited immediately.
    EngineStartFailure = 201,
    /// The engine did not report primary status within the configured bound.
    HealthCheckFailure = 202,
    /// Invalid configuration or local environment.
    Config = 300,
    /// Startup was cancelled by a shutdown request.
    Cancelled = 301,
}

impl ErrorKind {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the kind name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoordinationUnavailable => "coordination_unavailable",
            Self::LockTimeout => "lock_timeout",
            Self::SessionLost => "session_lost",
            Self::BootstrapFailure => "bootstrap_failure",
            Self::EngineStartFailure => "engine_start_failure",
            Self::HealthCheckFailure => "health_check_failure",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether errors of this kind are retried by the component that sees them.
    ///
    /// A lost session is transient from the node's point of view: the whole
    /// sequence restarts from `Connecting`.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::CoordinationUnavailable | Self::LockTimeout | Self::SessionLost)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while bootstrapping a node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BootstrapError {
    /// The coordination service could not be reached.
    #[snafu(display("coordination service unavailable: {message}"))]
    CoordinationUnavailable {
        /// Error description.
        message: String,
    },

    /// A lock-acquire attempt timed out.
    #[snafu(display("timed out acquiring lock {path} (attempt {attempt})"))]
    LockTimeout {
        /// Lock path.
        path: String,
        /// 1-based attempt number.
        attempt: u32,
    },

    /// The coordination session was lost.
    #[snafu(display("coordination session lost: {message}"))]
    SessionLost {
        /// Error description.
        message: String,
    },

    /// Every lock-acquire attempt timed out.
    #[snafu(display("bootstrap failed: lock {path} not acquired after {attempts} attempts"))]
    BootstrapFailure {
        /// Lock path.
        path: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The replication engine could not be launched.
    #[snafu(display("engine start failed at {location}: {message}"))]
    EngineStartFailure {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The engine never reported primary status within the configured bound.
    #[snafu(display("engine not primary after {waited_ms}ms (last status: {last_status})"))]
    HealthCheckFailure {
        /// Time spent waiting.
        waited_ms: u64,
        /// Last observed status description.
        last_status: String,
    },

    /// Invalid configuration or local environment.
    #[snafu(display("configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Startup was cancelled.
    #[snafu(display("startup cancelled"))]
    Cancelled,
}

impl BootstrapError {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CoordinationUnavailable { .. } => ErrorKind::CoordinationUnavailable,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::SessionLost { .. } => ErrorKind::SessionLost,
            Self::BootstrapFailure { .. } => ErrorKind::BootstrapFailure,
            Self::EngineStartFailure { .. } => ErrorKind::EngineStartFailure,
            Self::HealthCheckFailure { .. } => ErrorKind::HealthCheckFailure,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error should be retried rather than surfaced.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Fatal startup failure reported at the process boundary.
///
/// Carries the last state the node reached so a supervisor can decide whether
/// a restart is worthwhile.
#[derive(Debug)]
pub struct StartupFailure {
    last_state: ClusterState,
    error: BootstrapError,
}

impl StartupFailure {
    /// Wraps a fatal error with the state it occurred in.
    #[must_use]
    pub fn new(last_state: ClusterState, error: BootstrapError) -> Self {
        Self { last_state, error }
    }

    /// The state the node was in when the error occurred.
    #[must_use]
    pub fn last_state(&self) -> ClusterState {
        self.last_state
    }

    /// The kind of the underlying error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// The underlying error.
    #[must_use]
    pub fn error(&self) -> &BootstrapError {
        &self.error
    }

    /// Whether the failure is a requested shutdown rather than an error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, BootstrapError::Cancelled)
    }
}

impl fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "startup failed in state {} ({}): {}", self.last_state, self.kind(), self.error)
    }
}

impl std::error::Error for StartupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
