//! Deferral - A tracking library for deferred decisions and their blockers.
//!
//! This library provides the core functionality for the `dfr` CLI tool:
//! an append-friendly JSONL store guarded by a crash-tolerant directory lock,
//! and a dependency graph resolver that refuses blocking cycles.

pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod storage;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;
    use tempfile::TempDir;

    use crate::storage::{LockOptions, Storage};

    /// Test environment with an isolated data directory.
    pub struct TestEnv {
        /// Isolated data storage directory
        pub data_dir: TempDir,
    }

    impl TestEnv {
        /// Create a new test environment with an isolated directory.
        pub fn new() -> Self {
            Self {
                data_dir: TempDir::new().unwrap(),
            }
        }

        /// Get the path to the isolated data directory.
        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// Open storage for this test environment with a short lock timeout.
        pub fn open_storage(&self) -> Storage {
            Storage::open_with_options(self.data_path(), LockOptions::with_timeout_ms(2_000))
                .unwrap()
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Library-level error type for Deferral operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cycle detected: {item_id} cannot depend on {depends_on_id}")]
    CycleDetected { item_id: u64, depends_on_id: u64 },

    #[error(
        "Timed out after {waited_ms}ms waiting for lock {path} (high contention: retry later or raise lock-timeout-ms)"
    )]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("Corrupt data in {path} at line {line}: {message}")]
    CorruptData {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for Deferral operations.
pub type Result<T> = std::result::Result<T, Error>;
