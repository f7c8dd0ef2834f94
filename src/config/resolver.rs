//! Precedence resolution for settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. config.kdl in the data directory
//! 3. Built-in defaults

use crate::Result;
use crate::config::schema::MAX_MILLIS;
use crate::config::{DeferralConfig, load_config};
use crate::models::Priority;
use crate::storage::LockOptions;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Value from CLI flag
    Cli,
    /// Value from config.kdl
    Config,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Cli => write!(f, "cli"),
            ValueSource::Config => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }

    fn pick(cli: Option<T>, config: Option<T>, default: T) -> Self {
        match (cli, config) {
            (Some(v), _) => Self::new(v, ValueSource::Cli),
            (None, Some(v)) => Self::new(v, ValueSource::Config),
            (None, None) => Self::new(default, ValueSource::Default),
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub lock_timeout_ms: Option<u64>,
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub lock_timeout_ms: Resolved<u64>,
    pub lock_initial_backoff_ms: Resolved<u64>,
    pub lock_max_backoff_ms: Resolved<u64>,
    pub default_priority: Resolved<Priority>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::resolve(&DeferralConfig::new(), &ConfigOverrides::default())
    }
}

impl ResolvedConfig {
    /// Combine overrides, file config, and defaults. Durations are capped at
    /// `MAX_MILLIS` whatever their source.
    pub fn resolve(config: &DeferralConfig, overrides: &ConfigOverrides) -> Self {
        let defaults = LockOptions::default();
        let mut initial = Resolved::pick(
            None,
            config.lock_initial_backoff_ms,
            defaults.initial_backoff.as_millis() as u64,
        );
        initial.value = initial.value.min(MAX_MILLIS);
        // Keep the cap at or above the first delay even when only one is configured
        let mut max = Resolved::pick(
            None,
            config.lock_max_backoff_ms,
            defaults.max_backoff.as_millis() as u64,
        );
        max.value = max.value.clamp(initial.value, MAX_MILLIS);
        let mut timeout = Resolved::pick(
            overrides.lock_timeout_ms,
            config.lock_timeout_ms,
            defaults.timeout.as_millis() as u64,
        );
        timeout.value = timeout.value.min(MAX_MILLIS);

        Self {
            lock_timeout_ms: timeout,
            lock_initial_backoff_ms: initial,
            lock_max_backoff_ms: max,
            default_priority: Resolved::pick(None, config.default_priority, Priority::default()),
        }
    }

    /// Lock options for opening storage.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.lock_timeout_ms.value),
            initial_backoff: Duration::from_millis(self.lock_initial_backoff_ms.value),
            max_backoff: Duration::from_millis(self.lock_max_backoff_ms.value),
        }
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority.value
    }
}

/// Load config.kdl from `data_dir` and resolve it against `overrides`.
pub fn resolve_config(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let config = load_config(data_dir)?;
    Ok(ResolvedConfig::resolve(&config, overrides))
}
