//! Scratch directory for tests that touch node files.

#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// File name used for configuration written by [`TestDir::write_config`].
pub const CONFIG_FILE_NAME: &str = "clusterboot.toml";

/// A temporary directory laid out like a node's local state: a configuration
/// file at the root and runtime files under `run/`.
///
/// Removed when dropped.
///
/// ```
/// use clusterboot_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let config = dir.write_config("lock_timeout = \"3s\"\n");
/// assert!(config.ends_with("clusterboot.toml"));
/// assert!(dir.ready_file().starts_with(dir.path()));
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates an empty scratch directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: TempDir::new().expect("create scratch directory") }
    }

    /// Root of the scratch directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// `relative` resolved inside the scratch directory.
    #[must_use]
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path().join(relative)
    }

    /// Where a node under test should write its ready file. The `run/`
    /// directory is not created, so writers must create parents themselves.
    #[must_use]
    pub fn ready_file(&self) -> PathBuf {
        self.join("run/clusterboot.ready")
    }

    /// Writes a configuration file and returns its path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.join(CONFIG_FILE_NAME);
        std::fs::write(&path, contents).expect("write config file");
        path
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
