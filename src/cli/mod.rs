//! CLI argument definitions for Deferral.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Deferral - track decisions you are putting off, and what they wait on.
///
/// Capture items with `dfr capture`, link them with `dfr dep add`, then ask
/// `dfr order` for the sequence in which they can be settled.
#[derive(Parser, Debug)]
#[command(name = "dfr")]
#[command(author, version, about = "Track deferred decisions and the dependencies between them", long_about = None)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DFR_GIT_COMMIT"),
    ", built ",
    env!("DFR_BUILD_TIMESTAMP"),
    ")"
))]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if dfr was started in <path> instead of the current directory.
    /// The path must exist. Can also be set via DFR_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "DFR_REPO")]
    pub repo_path: Option<PathBuf>,

    /// Use this data directory instead of the one derived from the project path
    #[arg(long = "data-dir", global = true, env = "DFR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// How long to wait for the store lock before failing (overrides config)
    #[arg(long = "lock-timeout-ms", global = true)]
    pub lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture a new deferred decision
    Capture {
        /// What needs deciding
        decision: String,

        /// Background for whoever picks this up later
        #[arg(short, long)]
        context: Option<String>,

        /// Priority (low, medium, high)
        #[arg(short, long)]
        priority: Option<String>,

        /// Tags for the item (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Show an item by ID
    Show {
        /// Item ID
        id: u64,
    },

    /// List items
    List {
        /// Filter by status (pending, in-progress, done, archived)
        #[arg(long)]
        status: Option<String>,

        /// Filter by priority
        #[arg(long)]
        priority: Option<String>,

        /// Filter by tag (repeatable, all must match)
        #[arg(long)]
        tag: Vec<String>,

        /// Case-insensitive text search in decision and context
        #[arg(short, long)]
        search: Option<String>,

        /// Include archived items
        #[arg(short, long)]
        all: bool,

        /// Sort by id, created, updated or priority
        #[arg(long, default_value = "id")]
        sort: String,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Maximum number of items to return
        #[arg(long)]
        limit: Option<usize>,

        /// Number of matching items to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Update an item
    Update {
        /// Item ID
        id: u64,

        /// New decision text
        #[arg(long)]
        decision: Option<String>,

        /// New context
        #[arg(short, long, conflicts_with = "clear_context")]
        context: Option<String>,

        /// Remove the context
        #[arg(long)]
        clear_context: bool,

        /// New status (pending, in-progress, done, archived)
        #[arg(long)]
        status: Option<String>,

        /// New priority
        #[arg(short, long)]
        priority: Option<String>,

        /// Replace tags (repeatable)
        #[arg(short, long, conflicts_with = "clear_tags")]
        tag: Vec<String>,

        /// Remove all tags
        #[arg(long)]
        clear_tags: bool,
    },

    /// Archive an item (or remove it entirely with --hard)
    Delete {
        /// Item ID
        id: u64,

        /// Remove the record and every dependency that references it
        #[arg(long)]
        hard: bool,
    },

    /// Dependency management commands
    Dep {
        #[command(subcommand)]
        command: DepCommands,
    },

    /// List items waiting on unresolved blockers
    Blocked,

    /// Show the order in which open items can be resolved
    Order,

    /// Show the longest blocking chain under an item
    Chain {
        /// Item ID
        id: u64,
    },

    /// Show which items resolving this one would unblock
    Unblocks {
        /// Item ID
        id: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Dependency subcommands
#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Record that ITEM depends on DEPENDS_ON
    Add {
        /// The dependent item
        item_id: u64,

        /// The item it depends on
        depends_on_id: u64,

        /// Dependency type (blocks, parent-of, relates-to, duplicates)
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dependency_type: String,
    },

    /// Remove every dependency from ITEM on DEPENDS_ON
    Rm {
        /// The dependent item
        item_id: u64,

        /// The item it depends on
        depends_on_id: u64,
    },

    /// List an item's dependencies and dependents
    List {
        /// Item ID
        id: u64,
    },

    /// Check whether a blocking dependency would create a cycle
    Check {
        /// The dependent item
        item_id: u64,

        /// The item it would depend on
        depends_on_id: u64,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved settings and where each came from
    Show,

    /// Persist a setting to config.kdl
    Set {
        /// Setting key (lock-timeout-ms, lock-initial-backoff-ms, lock-max-backoff-ms, default-priority)
        key: String,

        /// New value
        value: String,
    },
}
