//! External program execution.

use std::{future::Future, process::Stdio};

use snafu::ResultExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CommandFailedSnafu, Result, SpawnSnafu};

/// Runs an external program and returns its standard output.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoadTestError::Spawn`] if the program cannot start and
    /// [`crate::LoadTestError::CommandFailed`] if it exits unsuccessfully.
    fn output(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Runs programs as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn output(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, args = ?args, "Running command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context(SpawnSnafu { program })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return CommandFailedSnafu {
                program,
                status: format!("{}: {}", output.status, stderr.trim()),
            }
            .fail();
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
