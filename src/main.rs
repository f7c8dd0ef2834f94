//! Deferral CLI - track deferred decisions and what they wait on.

use clap::Parser;
use deferral::cli::{Cli, Commands, ConfigCommands, DepCommands};
use deferral::commands::{self, Output};
use deferral::config::{ConfigOverrides, resolve_config};
use deferral::models::{
    DependencyType, ItemFilter, ItemPatch, ItemSort, ItemStatus, NewItem, Pagination, Priority,
    SortField,
};
use deferral::storage::{Storage, get_storage_dir};
use deferral::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run(cli) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Install a stderr subscriber filtered by `DFR_LOG` (default `warn`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("DFR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let human = cli.human_readable;
    let data_dir = resolve_data_dir(cli.repo_path, cli.data_dir)?;
    let overrides = ConfigOverrides {
        lock_timeout_ms: cli.lock_timeout_ms,
    };

    // Config commands work on the directory and never touch the lock
    if let Some(Commands::Config { command }) = cli.command {
        return match command {
            ConfigCommands::Show => {
                let resolved = resolve_config(&data_dir, &overrides)?;
                output(&commands::config_show(&data_dir, resolved), human);
                Ok(())
            }
            ConfigCommands::Set { key, value } => {
                output(&commands::config_set(&data_dir, &key, &value)?, human);
                Ok(())
            }
        };
    }

    let resolved = resolve_config(&data_dir, &overrides)?;
    let storage = Storage::open_with_options(&data_dir, resolved.lock_options())?
        .with_default_priority(resolved.default_priority());

    run_command(cli.command, &storage, human)
}

/// Resolve the data directory.
///
/// Priority: --data-dir flag > DFR_DATA_DIR env var > platform data dir keyed by
/// the project path (--repo / DFR_REPO, or the current directory).
fn resolve_data_dir(repo_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = data_dir {
        return Ok(dir);
    }

    let project = match repo_path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Validation(format!(
                    "Specified repo path does not exist: {}",
                    path.display()
                )));
            }
            path
        }
        None => env::current_dir()?,
    };
    get_storage_dir(&project)
}

fn run_command(command: Option<Commands>, storage: &Storage, human: bool) -> Result<()> {
    match command {
        None => output(&commands::status(storage)?, human),

        Some(Commands::Capture {
            decision,
            context,
            priority,
            tag,
        }) => {
            let input = NewItem {
                decision,
                context,
                priority: priority.as_deref().map(parse_arg::<Priority>).transpose()?,
                tags: tag,
            };
            output(&commands::capture(storage, input)?, human);
        }

        Some(Commands::Show { id }) => output(&commands::show(storage, id)?, human),

        Some(Commands::List {
            status,
            priority,
            tag,
            search,
            all,
            sort,
            desc,
            limit,
            offset,
        }) => {
            let filter = ItemFilter {
                status: status.as_deref().map(parse_arg::<ItemStatus>).transpose()?,
                priority: priority.as_deref().map(parse_arg::<Priority>).transpose()?,
                tags: tag,
                text: search,
                include_archived: all,
            };
            let sort = ItemSort {
                field: parse_arg::<SortField>(&sort)?,
                descending: desc,
            };
            let page = Pagination { offset, limit };
            output(&commands::list(storage, &filter, sort, page)?, human);
        }

        Some(Commands::Update {
            id,
            decision,
            context,
            clear_context,
            status,
            priority,
            tag,
            clear_tags,
        }) => {
            let patch = ItemPatch {
                decision,
                context: if clear_context {
                    Some(None)
                } else {
                    context.map(Some)
                },
                status: status.as_deref().map(parse_arg::<ItemStatus>).transpose()?,
                priority: priority.as_deref().map(parse_arg::<Priority>).transpose()?,
                tags: if clear_tags {
                    Some(Vec::new())
                } else if tag.is_empty() {
                    None
                } else {
                    Some(tag)
                },
            };
            output(&commands::update(storage, id, patch)?, human);
        }

        Some(Commands::Delete { id, hard }) => {
            output(&commands::delete(storage, id, hard)?, human)
        }

        Some(Commands::Dep { command }) => match command {
            DepCommands::Add {
                item_id,
                depends_on_id,
                dependency_type,
            } => {
                let dependency_type = parse_arg::<DependencyType>(&dependency_type)?;
                output(
                    &commands::dep_add(storage, item_id, depends_on_id, dependency_type)?,
                    human,
                );
            }
            DepCommands::Rm {
                item_id,
                depends_on_id,
            } => output(&commands::dep_rm(storage, item_id, depends_on_id)?, human),
            DepCommands::List { id } => output(&commands::dep_list(storage, id)?, human),
            DepCommands::Check {
                item_id,
                depends_on_id,
            } => output(
                &commands::dep_check(storage, item_id, depends_on_id)?,
                human,
            ),
        },

        Some(Commands::Blocked) => output(&commands::blocked(storage)?, human),
        Some(Commands::Order) => output(&commands::order(storage)?, human),
        Some(Commands::Chain { id }) => output(&commands::chain(storage, id)?, human),
        Some(Commands::Unblocks { id }) => output(&commands::unblocks(storage, id)?, human),

        // Handled before storage is opened
        Some(Commands::Config { .. }) => {}
    }
    Ok(())
}

/// Parse a CLI string value, reporting failures as validation errors.
fn parse_arg<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(Error::Validation)
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
