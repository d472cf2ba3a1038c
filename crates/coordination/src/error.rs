//! Coordination service errors.

use clusterboot_types::BootstrapError;
use snafu::Snafu;

/// Result type for coordination operations.
pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;

/// Errors returned by a coordination backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The service could not be reached or refused the request.
    #[snafu(display("coordination service unavailable: {message}"))]
    Unavailable {
        /// Error description.
        message: String,
    },

    /// A bounded wait elapsed.
    #[snafu(display("{operation} timed out after {timeout_ms}ms"))]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// The session ended; its locks and ephemeral entries are gone.
    #[snafu(display("session expired: {message}"))]
    SessionExpired {
        /// Error description.
        message: String,
    },

    /// An ephemeral entry already exists at the path.
    #[snafu(display("entry already exists at {path}"))]
    NodeExists {
        /// The conflicting path.
        path: String,
    },

    /// A release was attempted for a lock this session does not hold.
    #[snafu(display("lock {path} is not held by this session"))]
    LockNotHeld {
        /// Lock path.
        path: String,
    },

    /// A registry record could not be encoded.
    #[snafu(display("failed to encode registry entry for {path}: {source}"))]
    Codec {
        /// Entry path.
        path: String,
        /// Underlying serialization error.
        source: serde_json::Error,
    },

    /// The etcd client returned an error.
    #[snafu(display("etcd request failed: {source}"))]
    Etcd {
        /// Underlying client error.
        source: etcd_client::Error,
    },
}

impl CoordinationError {
    /// Whether the session backing the request is gone.
    #[must_use]
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Whether a bounded wait elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<CoordinationError> for BootstrapError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::SessionExpired { message } => BootstrapError::SessionLost { message },
            other => BootstrapError::CoordinationUnavailable { message: other.to_string() },
        }
    }
}
