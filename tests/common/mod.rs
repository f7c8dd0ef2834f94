//! Common test utilities for deferral integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/deferral/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with isolated data storage.
///
/// Each `TestEnv` creates two temporary directories:
/// - `repo_dir`: Acts as the project directory the CLI runs in
/// - `data_dir`: Holds deferral's data (via `DFR_DATA_DIR` env var)
///
/// The `dfr()` method returns a `Command` that sets `DFR_DATA_DIR` per
/// invocation, making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the dfr binary with isolated data directory.
    pub fn dfr(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_dfr"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("DFR_DATA_DIR", self.data_dir.path());
        cmd.env_remove("DFR_REPO");
        cmd.env_remove("DFR_LOG");
        cmd
    }

    /// Run a command that must succeed and parse its stdout as JSON.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.dfr().args(args).assert().success().get_output().clone();
        serde_json::from_slice(&output.stdout).unwrap()
    }

    /// Capture an item and return its id.
    pub fn capture(&self, decision: &str) -> u64 {
        self.json(&["capture", decision])["id"].as_u64().unwrap()
    }

    /// Add a blocking dependency: `item` depends on `on`.
    pub fn block(&self, item: u64, on: u64) {
        self.dfr()
            .args(["dep", "add", &item.to_string(), &on.to_string()])
            .assert()
            .success();
    }

    /// Get the path to the repo directory.
    pub fn repo_path(&self) -> &std::path::Path {
        self.repo_dir.path()
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
