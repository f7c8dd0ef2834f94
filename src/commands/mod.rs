//! Command implementations for the Deferral CLI.
//!
//! Each command talks to the store through [`StoragePort`] (plus the graph
//! queries on [`Storage`]) and returns a result that can be printed as
//! JSON or as human-readable text.

use crate::config::{self, ResolvedConfig};
use crate::models::graph::{BlockedItem, DependencyChain, DependencyGraph};
use crate::models::{
    Dependency, DependencyType, Item, ItemFilter, ItemPatch, ItemSort, ItemStatus, NewItem,
    Pagination,
};
use crate::storage::{Storage, StoragePort, validate_id};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

fn item_line(item: &Item) -> String {
    let mut line = format!(
        "#{} [{}/{}] {}",
        item.id, item.status, item.priority, item.decision
    );
    if !item.tags.is_empty() {
        line.push_str(&format!(" ({})", item.tags.join(", ")));
    }
    line
}

fn id_list(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("#{}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn find_item(items: &[Item], id: u64) -> Option<&Item> {
    items.iter().find(|i| i.id == id)
}

// === Items ===

/// A single item.
#[derive(Serialize)]
pub struct ItemOutput {
    #[serde(flatten)]
    pub item: Item,
}

impl Output for ItemOutput {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let item = &self.item;
        let mut lines = vec![item_line(item)];
        if let Some(ref context) = item.context {
            lines.push(format!("  Context: {}", context));
        }
        lines.push(format!(
            "  Created: {}",
            item.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!(
            "  Updated: {}",
            item.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.join("\n")
    }
}

/// Capture a new item.
pub fn capture(storage: &Storage, input: NewItem) -> Result<ItemOutput> {
    let item = storage.create_item(input)?;
    Ok(ItemOutput { item })
}

/// Show one item.
pub fn show(storage: &Storage, id: u64) -> Result<ItemOutput> {
    let item = storage.get_item(id)?;
    Ok(ItemOutput { item })
}

/// Update an item.
pub fn update(storage: &Storage, id: u64, patch: ItemPatch) -> Result<ItemOutput> {
    let item = storage.update_item(id, patch)?;
    Ok(ItemOutput { item })
}

/// A page of listed items.
#[derive(Serialize)]
pub struct ItemList {
    pub items: Vec<Item>,
    pub count: usize,
    pub total: usize,
}

impl Output for ItemList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.items.is_empty() {
            return "No items found.".to_string();
        }
        let mut lines: Vec<String> = self.items.iter().map(item_line).collect();
        lines.push(format!("Showing {} of {} item(s)", self.count, self.total));
        lines.join("\n")
    }
}

/// List items.
pub fn list(
    storage: &Storage,
    filter: &ItemFilter,
    sort: ItemSort,
    page: Pagination,
) -> Result<ItemList> {
    let page = storage.list_items(filter, sort, page)?;
    Ok(ItemList {
        count: page.items.len(),
        total: page.total,
        items: page.items,
    })
}

/// Result of deleting an item.
#[derive(Serialize)]
pub struct DeleteOutput {
    pub item: Item,
    pub hard: bool,
}

impl Output for DeleteOutput {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.hard {
            format!("Deleted #{}: {}", self.item.id, self.item.decision)
        } else {
            format!("Archived #{}: {}", self.item.id, self.item.decision)
        }
    }
}

/// Archive an item, or remove it with `hard`.
pub fn delete(storage: &Storage, id: u64, hard: bool) -> Result<DeleteOutput> {
    let item = storage.delete_item(id, hard)?;
    Ok(DeleteOutput { item, hard })
}

// === Dependencies ===

/// A created dependency.
#[derive(Serialize)]
pub struct DependencyAdded {
    pub dependency: Dependency,
}

impl Output for DependencyAdded {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let d = &self.dependency;
        format!(
            "#{} now depends on #{} ({})",
            d.item_id, d.depends_on_id, d.dependency_type
        )
    }
}

/// Add a dependency.
pub fn dep_add(
    storage: &Storage,
    item_id: u64,
    depends_on_id: u64,
    dependency_type: DependencyType,
) -> Result<DependencyAdded> {
    let dependency = storage.create_dependency(item_id, depends_on_id, dependency_type)?;
    Ok(DependencyAdded { dependency })
}

/// Removed dependencies.
#[derive(Serialize)]
pub struct DependencyRemoved {
    pub removed: Vec<Dependency>,
}

impl Output for DependencyRemoved {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.removed
            .iter()
            .map(|d| {
                format!(
                    "Removed: #{} -> #{} ({})",
                    d.item_id, d.depends_on_id, d.dependency_type
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Remove every dependency between two items.
pub fn dep_rm(storage: &Storage, item_id: u64, depends_on_id: u64) -> Result<DependencyRemoved> {
    let removed = storage.delete_dependency(item_id, depends_on_id)?;
    Ok(DependencyRemoved { removed })
}

/// Both directions of an item's relationships.
#[derive(Serialize)]
pub struct DependencyList {
    pub item_id: u64,
    pub dependencies: Vec<Dependency>,
    pub dependents: Vec<Dependency>,
}

impl Output for DependencyList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("#{}", self.item_id)];
        if self.dependencies.is_empty() && self.dependents.is_empty() {
            lines.push("  No dependencies.".to_string());
        }
        for d in &self.dependencies {
            lines.push(format!("  depends on #{} ({})", d.depends_on_id, d.dependency_type));
        }
        for d in &self.dependents {
            lines.push(format!("  needed by #{} ({})", d.item_id, d.dependency_type));
        }
        lines.join("\n")
    }
}

/// List an item's dependencies and dependents.
pub fn dep_list(storage: &Storage, item_id: u64) -> Result<DependencyList> {
    Ok(DependencyList {
        item_id,
        dependencies: storage.get_dependencies(item_id)?,
        dependents: storage.get_dependents(item_id)?,
    })
}

/// Answer to a cycle check.
#[derive(Serialize)]
pub struct CycleCheck {
    pub item_id: u64,
    pub depends_on_id: u64,
    pub would_create_cycle: bool,
}

impl Output for CycleCheck {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.would_create_cycle {
            format!(
                "#{} -> #{} would create a cycle",
                self.item_id, self.depends_on_id
            )
        } else {
            format!("#{} -> #{} is safe", self.item_id, self.depends_on_id)
        }
    }
}

/// Check whether a blocking dependency would create a cycle.
pub fn dep_check(storage: &Storage, item_id: u64, depends_on_id: u64) -> Result<CycleCheck> {
    Ok(CycleCheck {
        item_id,
        depends_on_id,
        would_create_cycle: storage.would_create_cycle(item_id, depends_on_id)?,
    })
}

// === Graph queries ===

/// A blocked item with its decision text.
#[derive(Serialize)]
pub struct BlockedEntry {
    pub decision: String,
    #[serde(flatten)]
    pub blocked: BlockedItem,
}

/// Every blocked item.
#[derive(Serialize)]
pub struct BlockedList {
    pub blocked: Vec<BlockedEntry>,
    pub count: usize,
}

impl Output for BlockedList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.blocked.is_empty() {
            return "No blocked items.".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.blocked {
            let b = &entry.blocked;
            lines.push(format!("#{} {}", b.item_id, entry.decision));
            lines.push(format!("  waiting on: {}", id_list(&b.direct_blockers)));
            if b.transitive_blockers.len() > b.direct_blockers.len() {
                lines.push(format!("  all blockers: {}", id_list(&b.transitive_blockers)));
            }
            if b.directly_unblockable {
                lines.push("  unblockable now".to_string());
            }
        }
        lines.push(format!("{} blocked item(s)", self.count));
        lines.join("\n")
    }
}

/// List blocked items.
pub fn blocked(storage: &Storage) -> Result<BlockedList> {
    let (items, dependencies) = storage.snapshot()?;
    let graph = DependencyGraph::build(&items, &dependencies);

    let blocked: Vec<BlockedEntry> = graph
        .blocked_items()
        .into_iter()
        .map(|b| BlockedEntry {
            decision: find_item(&items, b.item_id)
                .map(|i| i.decision.clone())
                .unwrap_or_default(),
            blocked: b,
        })
        .collect();

    Ok(BlockedList {
        count: blocked.len(),
        blocked,
    })
}

/// Items in resolution order.
#[derive(Serialize)]
pub struct ResolutionOrder {
    pub order: Vec<Item>,
}

impl Output for ResolutionOrder {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.order.is_empty() {
            return "Nothing left to resolve.".to_string();
        }
        self.order
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{:>3}. {}", i + 1, item_line(item)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Resolution order over every open item.
pub fn order(storage: &Storage) -> Result<ResolutionOrder> {
    Ok(ResolutionOrder {
        order: storage.get_resolution_order()?,
    })
}

/// The longest blocking chain under an item.
#[derive(Serialize)]
pub struct ChainOutput {
    #[serde(flatten)]
    pub chain: DependencyChain,
    pub items: Vec<Item>,
}

impl Output for ChainOutput {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Chain depth {} from #{}",
            self.chain.depth, self.chain.item_id
        )];
        for (depth, item) in self.items.iter().enumerate() {
            lines.push(format!("{}{}", "  ".repeat(depth + 1), item_line(item)));
        }
        lines.join("\n")
    }
}

/// Longest dependency chain from an item.
pub fn chain(storage: &Storage, id: u64) -> Result<ChainOutput> {
    validate_id(id)?;
    let (items, dependencies) = storage.snapshot()?;
    let chain = DependencyGraph::build(&items, &dependencies)
        .dependency_chain(id)
        .ok_or_else(|| Error::NotFound(format!("item {}", id)))?;
    let items = chain
        .chain
        .iter()
        .filter_map(|&id| find_item(&items, id).cloned())
        .collect();
    Ok(ChainOutput { chain, items })
}

/// Items freed by resolving one item.
#[derive(Serialize)]
pub struct UnblocksOutput {
    pub item_id: u64,
    pub items: Vec<Item>,
}

impl Output for UnblocksOutput {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.items.is_empty() {
            return format!("Resolving #{} unblocks nothing.", self.item_id);
        }
        let mut lines = vec![format!("Resolving #{} unblocks:", self.item_id)];
        lines.extend(self.items.iter().map(|i| format!("  {}", item_line(i))));
        lines.join("\n")
    }
}

/// Items that would be unblocked by resolving `id`.
pub fn unblocks(storage: &Storage, id: u64) -> Result<UnblocksOutput> {
    Ok(UnblocksOutput {
        item_id: id,
        items: storage.get_items_unblocked_by(id)?,
    })
}

// === Status ===

/// Overview of the store.
#[derive(Serialize)]
pub struct StatusSummary {
    pub data_dir: PathBuf,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub archived: usize,
    pub blocked: usize,
    pub next: Option<Item>,
}

impl Output for StatusSummary {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Deferral: {}", self.data_dir.display()),
            format!(
                "  {} item(s): {} pending, {} in progress, {} done, {} archived",
                self.total, self.pending, self.in_progress, self.done, self.archived
            ),
            format!("  {} blocked", self.blocked),
        ];
        if let Some(ref next) = self.next {
            lines.push(format!("  Next up: {}", item_line(next)));
        }
        lines.join("\n")
    }
}

/// Summarize the store.
pub fn status(storage: &Storage) -> Result<StatusSummary> {
    let (items, dependencies) = storage.snapshot()?;
    let count = |status: ItemStatus| items.iter().filter(|i| i.status == status).count();

    // Counts, blocked set and next item all come from the same read
    let graph = DependencyGraph::build(&items, &dependencies);
    let blocked = graph.blocked_items();
    let next = graph
        .resolution_order()
        .into_iter()
        .find(|id| !blocked.iter().any(|b| b.item_id == *id))
        .and_then(|id| find_item(&items, id).cloned());

    Ok(StatusSummary {
        data_dir: storage.root().to_path_buf(),
        total: items.len(),
        pending: count(ItemStatus::Pending),
        in_progress: count(ItemStatus::InProgress),
        done: count(ItemStatus::Done),
        archived: count(ItemStatus::Archived),
        blocked: blocked.len(),
        next,
    })
}

// === Config ===

/// Resolved settings.
#[derive(Serialize)]
pub struct ConfigShow {
    pub path: PathBuf,
    #[serde(flatten)]
    pub config: ResolvedConfig,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        [
            format!("Config: {}", self.path.display()),
            format!(
                "  lock-timeout-ms = {} ({})",
                c.lock_timeout_ms.value, c.lock_timeout_ms.source
            ),
            format!(
                "  lock-initial-backoff-ms = {} ({})",
                c.lock_initial_backoff_ms.value, c.lock_initial_backoff_ms.source
            ),
            format!(
                "  lock-max-backoff-ms = {} ({})",
                c.lock_max_backoff_ms.value, c.lock_max_backoff_ms.source
            ),
            format!(
                "  default-priority = {} ({})",
                c.default_priority.value, c.default_priority.source
            ),
        ]
        .join("\n")
    }
}

/// Show resolved settings.
pub fn config_show(data_dir: &Path, resolved: ResolvedConfig) -> ConfigShow {
    ConfigShow {
        path: config::config_path(data_dir),
        config: resolved,
    }
}

/// A persisted setting.
#[derive(Serialize)]
pub struct ConfigSet {
    pub key: String,
    pub value: String,
}

impl Output for ConfigSet {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {}", self.key, self.value)
    }
}

/// Persist one setting to config.kdl.
pub fn config_set(data_dir: &Path, key: &str, value: &str) -> Result<ConfigSet> {
    if key.trim().is_empty() {
        return Err(Error::Validation("config key must not be empty".to_string()));
    }
    config::set_config_value(data_dir, key, value)?;
    Ok(ConfigSet {
        key: key.to_string(),
        value: value.trim().to_string(),
    })
}
