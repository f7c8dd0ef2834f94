//! Storage layer for Deferral data.
//!
//! A data directory holds:
//! - `items.jsonl` - one item per line
//! - `dependencies.jsonl` - one dependency per line
//! - `.lock` - present while a process is writing (see [`lock`])
//! - `config.kdl` - optional settings (see [`crate::config`])
//!
//! [`Storage`] is an explicit instance bound to one directory. Consumers go
//! through the [`StoragePort`] trait; the graph is rebuilt from a fresh
//! snapshot for every query that needs it.

pub mod lock;
pub mod log;

pub use lock::{LOCK_FILE_NAME, LockGuard, LockManager, LockOptions, is_process_alive};
pub use log::{LogStore, decode_records, encode_record, next_id};

use crate::models::graph::{BlockedItem, DependencyChain, DependencyGraph};
use crate::models::{
    Dependency, DependencyType, Item, ItemFilter, ItemPage, ItemPatch, ItemSort, ItemStatus,
    NewItem, Pagination, Priority, normalize_tags,
};
use crate::{Error, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Items log file name.
pub const ITEMS_FILE: &str = "items.jsonl";

/// Dependencies log file name.
pub const DEPENDENCIES_FILE: &str = "dependencies.jsonl";

/// The operations surrounding application code may perform on the store.
pub trait StoragePort {
    /// Capture a new pending item.
    fn create_item(&self, input: NewItem) -> Result<Item>;

    fn get_item(&self, id: u64) -> Result<Item>;

    /// List items matching `filter`, sorted, then paginated.
    fn list_items(&self, filter: &ItemFilter, sort: ItemSort, page: Pagination)
    -> Result<ItemPage>;

    /// Apply a partial update and return the new item.
    fn update_item(&self, id: u64, patch: ItemPatch) -> Result<Item>;

    /// Archive the item, or with `hard` remove it and its dependencies.
    fn delete_item(&self, id: u64, hard: bool) -> Result<Item>;

    /// Record that `item_id` depends on `depends_on_id`.
    ///
    /// Blocking types are refused with `CycleDetected` if they would close a cycle.
    fn create_dependency(
        &self,
        item_id: u64,
        depends_on_id: u64,
        dependency_type: DependencyType,
    ) -> Result<Dependency>;

    /// Dependencies where `item_id` is the dependent.
    fn get_dependencies(&self, item_id: u64) -> Result<Vec<Dependency>>;

    /// Dependencies where `item_id` is depended upon.
    fn get_dependents(&self, item_id: u64) -> Result<Vec<Dependency>>;

    /// Would a blocking `item_id -> depends_on_id` edge close a cycle?
    fn would_create_cycle(&self, item_id: u64, depends_on_id: u64) -> Result<bool>;

    /// Remove every dependency record from `item_id` to `depends_on_id`.
    fn delete_dependency(&self, item_id: u64, depends_on_id: u64) -> Result<Vec<Dependency>>;

    fn get_blocked_items(&self) -> Result<Vec<BlockedItem>>;
}

/// Storage bound to one data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    lock: LockManager,
    items: LogStore<Item>,
    dependencies: LogStore<Dependency>,
    default_priority: Priority,
}

impl Storage {
    /// Open storage in `data_dir` with default lock options.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_options(data_dir, LockOptions::default())
    }

    /// Open storage in `data_dir`, creating the directory if needed.
    pub fn open_with_options(data_dir: &Path, options: LockOptions) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let lock = LockManager::new(data_dir, options);

        Ok(Self {
            root: data_dir.to_path_buf(),
            items: LogStore::new(data_dir.join(ITEMS_FILE), lock.clone()),
            dependencies: LogStore::new(data_dir.join(DEPENDENCIES_FILE), lock.clone()),
            lock,
            default_priority: Priority::default(),
        })
    }

    /// Priority given to captured items that do not specify one.
    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Get the storage root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock
    }

    /// Read items and dependencies as one best-effort snapshot.
    pub fn snapshot(&self) -> Result<(Vec<Item>, Vec<Dependency>)> {
        Ok((self.items.read_all()?, self.dependencies.read_all()?))
    }

    /// Build a fresh dependency graph from the current files.
    pub fn graph(&self) -> Result<DependencyGraph> {
        let (items, dependencies) = self.snapshot()?;
        Ok(DependencyGraph::build(&items, &dependencies))
    }

    /// Non-terminal items in an order that respects every blocking dependency.
    pub fn get_resolution_order(&self) -> Result<Vec<Item>> {
        let (items, dependencies) = self.snapshot()?;
        let graph = DependencyGraph::build(&items, &dependencies);
        Ok(pick_items(&items, &graph.resolution_order()))
    }

    /// Longest blocking chain starting at `id`.
    pub fn get_dependency_chain(&self, id: u64) -> Result<DependencyChain> {
        validate_id(id)?;
        self.graph()?
            .dependency_chain(id)
            .ok_or_else(|| item_not_found(id))
    }

    /// Items that become unblocked once `id` is resolved.
    pub fn get_items_unblocked_by(&self, id: u64) -> Result<Vec<Item>> {
        validate_id(id)?;
        let (items, dependencies) = self.snapshot()?;
        let graph = DependencyGraph::build(&items, &dependencies);
        if !graph.contains(id) {
            return Err(item_not_found(id));
        }
        Ok(pick_items(&items, &graph.items_unblocked_by(id)))
    }

    fn require_item(&self, items: &[Item], id: u64) -> Result<()> {
        if items.iter().any(|i| i.id == id) {
            Ok(())
        } else {
            Err(item_not_found(id))
        }
    }

    fn create_dependency_locked(
        &self,
        guard: &LockGuard,
        item_id: u64,
        depends_on_id: u64,
        dependency_type: DependencyType,
    ) -> Result<Dependency> {
        let items = self.items.read_all()?;
        self.require_item(&items, item_id)?;
        self.require_item(&items, depends_on_id)?;

        let existing = self.dependencies.read_all()?;
        if existing.iter().any(|d| {
            d.item_id == item_id
                && d.depends_on_id == depends_on_id
                && d.dependency_type == dependency_type
        }) {
            return Err(Error::Validation(format!(
                "Dependency already exists: {} {} {}",
                item_id, dependency_type, depends_on_id
            )));
        }

        if dependency_type.is_blocking()
            && DependencyGraph::build(&items, &existing).would_create_cycle(item_id, depends_on_id)
        {
            return Err(Error::CycleDetected {
                item_id,
                depends_on_id,
            });
        }

        let mut dependency = Dependency::new(item_id, depends_on_id, dependency_type);
        dependency.id = self.dependencies.append_locked(guard, dependency.clone())?;
        Ok(dependency)
    }
}

impl StoragePort for Storage {
    fn create_item(&self, input: NewItem) -> Result<Item> {
        let decision = input.decision.trim();
        if decision.is_empty() {
            return Err(Error::Validation("decision must not be empty".to_string()));
        }

        let mut item = Item::new(decision.to_string());
        item.context = clean_context(input.context);
        item.priority = input.priority.unwrap_or(self.default_priority);
        item.tags = normalize_tags(&input.tags);

        item.id = self.items.append(item.clone())?;
        debug!(id = item.id, "captured item");
        Ok(item)
    }

    fn get_item(&self, id: u64) -> Result<Item> {
        validate_id(id)?;
        self.items.find_by_id(id)?.ok_or_else(|| item_not_found(id))
    }

    fn list_items(
        &self,
        filter: &ItemFilter,
        sort: ItemSort,
        page: Pagination,
    ) -> Result<ItemPage> {
        let mut items: Vec<Item> = self
            .items
            .read_all()?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();
        let total = items.len();
        sort.apply(&mut items);

        let items = items
            .into_iter()
            .skip(page.offset)
            .take(page.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(ItemPage { items, total })
    }

    fn update_item(&self, id: u64, patch: ItemPatch) -> Result<Item> {
        validate_id(id)?;
        if patch.is_empty() {
            return Err(Error::Validation("no fields to update".to_string()));
        }
        let decision = match patch.decision {
            Some(ref d) if d.trim().is_empty() => {
                return Err(Error::Validation("decision must not be empty".to_string()));
            }
            Some(ref d) => Some(d.trim().to_string()),
            None => None,
        };

        self.items.mutate(|items| {
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| item_not_found(id))?;

            if let Some(decision) = decision {
                item.decision = decision;
            }
            if let Some(context) = patch.context {
                item.context = clean_context(context);
            }
            if let Some(status) = patch.status {
                item.status = status;
            }
            if let Some(priority) = patch.priority {
                item.priority = priority;
            }
            if let Some(tags) = patch.tags {
                item.tags = normalize_tags(&tags);
            }
            item.updated_at = Utc::now();

            Ok((item.clone(), true))
        })
    }

    fn delete_item(&self, id: u64, hard: bool) -> Result<Item> {
        validate_id(id)?;

        if !hard {
            return self.items.mutate(|items| {
                let item = items
                    .iter_mut()
                    .find(|i| i.id == id)
                    .ok_or_else(|| item_not_found(id))?;
                item.status = ItemStatus::Archived;
                item.updated_at = Utc::now();
                Ok((item.clone(), true))
            });
        }

        // Both logs are read and checked before either is rewritten, so a
        // missing item or a corrupt log leaves everything untouched.
        let guard = self.lock.acquire()?;
        let items = self.items.read_all()?;
        self.require_item(&items, id)?;

        let dropped = self.dependencies.mutate_locked(&guard, |deps| {
            let before = deps.len();
            deps.retain(|d| !d.involves(id));
            let dropped = before - deps.len();
            Ok((dropped, dropped > 0))
        })?;
        let removed = self.items.mutate_locked(&guard, |items| {
            let idx = items
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| item_not_found(id))?;
            Ok((items.remove(idx), true))
        })?;
        guard.release()?;

        debug!(id, dropped_dependencies = dropped, "hard-deleted item");
        Ok(removed)
    }

    fn create_dependency(
        &self,
        item_id: u64,
        depends_on_id: u64,
        dependency_type: DependencyType,
    ) -> Result<Dependency> {
        validate_id(item_id)?;
        validate_id(depends_on_id)?;
        if item_id == depends_on_id {
            return Err(Error::Validation(format!(
                "item {} cannot depend on itself",
                item_id
            )));
        }

        // Held across the cycle check and the append so concurrent writers
        // cannot both pass the check.
        let guard = self.lock.acquire()?;
        let dependency =
            self.create_dependency_locked(&guard, item_id, depends_on_id, dependency_type)?;
        guard.release()?;

        debug!(
            item_id,
            depends_on_id,
            dependency_type = %dependency_type,
            "created dependency"
        );
        Ok(dependency)
    }

    fn get_dependencies(&self, item_id: u64) -> Result<Vec<Dependency>> {
        self.get_item(item_id)?;
        Ok(self
            .dependencies
            .read_all()?
            .into_iter()
            .filter(|d| d.item_id == item_id)
            .collect())
    }

    fn get_dependents(&self, item_id: u64) -> Result<Vec<Dependency>> {
        self.get_item(item_id)?;
        Ok(self
            .dependencies
            .read_all()?
            .into_iter()
            .filter(|d| d.depends_on_id == item_id)
            .collect())
    }

    fn would_create_cycle(&self, item_id: u64, depends_on_id: u64) -> Result<bool> {
        validate_id(item_id)?;
        validate_id(depends_on_id)?;
        let (items, dependencies) = self.snapshot()?;
        self.require_item(&items, item_id)?;
        self.require_item(&items, depends_on_id)?;
        Ok(DependencyGraph::build(&items, &dependencies).would_create_cycle(item_id, depends_on_id))
    }

    fn delete_dependency(&self, item_id: u64, depends_on_id: u64) -> Result<Vec<Dependency>> {
        validate_id(item_id)?;
        validate_id(depends_on_id)?;

        self.dependencies.mutate(|deps| {
            let (removed, kept): (Vec<Dependency>, Vec<Dependency>) = deps
                .drain(..)
                .partition(|d| d.item_id == item_id && d.depends_on_id == depends_on_id);
            *deps = kept;
            if removed.is_empty() {
                return Err(Error::NotFound(format!(
                    "dependency {} -> {}",
                    item_id, depends_on_id
                )));
            }
            Ok((removed, true))
        })
    }

    fn get_blocked_items(&self) -> Result<Vec<BlockedItem>> {
        Ok(self.graph()?.blocked_items())
    }
}

/// Reject ids that can never name a record.
pub fn validate_id(id: u64) -> Result<()> {
    if id == 0 {
        return Err(Error::Validation(
            "Invalid id 0: ids start at 1".to_string(),
        ));
    }
    Ok(())
}

fn item_not_found(id: u64) -> Error {
    Error::NotFound(format!("item {}", id))
}

fn clean_context(context: Option<String>) -> Option<String> {
    context
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Look up items by id, preserving the order of `ids`.
fn pick_items(items: &[Item], ids: &[u64]) -> Vec<Item> {
    ids.iter()
        .filter_map(|id| items.iter().find(|i| i.id == *id).cloned())
        .collect()
}

/// Default data directory for a project.
///
/// Uses a hash of the canonical project path to pick a unique directory
/// under the platform data dir (e.g., `~/.local/share/deferral/`).
pub fn get_storage_dir(project_path: &Path) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

    let canonical = project_path.canonicalize().map_err(|e| {
        Error::Config(format!(
            "Could not canonicalize project path {}: {}",
            project_path.display(),
            e
        ))
    })?;

    Ok(data_dir.join("deferral").join(project_hash(&canonical)))
}

/// First 12 hex chars of the SHA-256 of a path.
fn project_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..12].to_string()
}
