//! Data models for Deferral entities.
//!
//! This module defines the core data structures:
//! - `Item` - A deferred decision with status, priority, and tags
//! - `Dependency` - A typed relationship between two items
//! - `Record` - What the log store needs from anything it persists
//!
//! Query types for the storage port (`NewItem`, `ItemPatch`, `ItemFilter`,
//! `ItemSort`, `Pagination`, `ItemPage`) live here too.

pub mod graph;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value persisted as one line of a JSONL log file.
///
/// Ids are positive; `0` marks a record whose id has not been assigned yet.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Entity kind used in file names and error messages (e.g., "item").
    const KIND: &'static str;

    /// The record's id (0 if unassigned).
    fn id(&self) -> u64;

    /// Assign the record's id.
    fn set_id(&mut self, id: u64);
}

/// Item status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Archived,
}

impl ItemStatus {
    /// Terminal items no longer block anything and are left out of resolution order.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Archived)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in-progress",
            ItemStatus::Done => "done",
            ItemStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ItemStatus::Pending),
            "in-progress" | "in_progress" | "inprogress" => Ok(ItemStatus::InProgress),
            "done" => Ok(ItemStatus::Done),
            "archived" => Ok(ItemStatus::Archived),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Item priority. Ordering is `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "med" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A deferred decision tracked by Deferral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier, allocated as max existing id + 1
    pub id: u64,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// The decision being deferred
    pub decision: String,

    /// Why it was deferred, what it hinges on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Current status
    #[serde(default)]
    pub status: ItemStatus,

    /// Priority level
    #[serde(default)]
    pub priority: Priority,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Create a new pending item with an unassigned id.
    pub fn new(decision: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            entity_type: "item".to_string(),
            decision,
            context: None,
            status: ItemStatus::default(),
            priority: Priority::default(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for Item {
    const KIND: &'static str = "item";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Types of relationships between items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    /// Item cannot be resolved until the other item is
    #[default]
    Blocks,
    /// Containment relationship; the child waits on the parent
    ParentOf,
    /// Informational link
    RelatesTo,
    /// Item restates the other item
    Duplicates,
}

impl DependencyType {
    /// Returns true if this type participates in cycle detection and blocking.
    pub fn is_blocking(&self) -> bool {
        matches!(self, DependencyType::Blocks | DependencyType::ParentOf)
    }

    /// Get all dependency types.
    pub fn all() -> &'static [DependencyType] {
        &[
            DependencyType::Blocks,
            DependencyType::ParentOf,
            DependencyType::RelatesTo,
            DependencyType::Duplicates,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Blocks => "blocks",
            DependencyType::ParentOf => "parent-of",
            DependencyType::RelatesTo => "relates-to",
            DependencyType::Duplicates => "duplicates",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "blocks" => Ok(DependencyType::Blocks),
            "parent-of" => Ok(DependencyType::ParentOf),
            "relates-to" => Ok(DependencyType::RelatesTo),
            "duplicates" => Ok(DependencyType::Duplicates),
            _ => Err(format!("Unknown dependency type: {}", s)),
        }
    }
}

/// A directed relationship: `item_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Unique identifier within the dependency log
    pub id: u64,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// The dependent item
    pub item_id: u64,

    /// The item that must be resolved first
    pub depends_on_id: u64,

    /// Type of relationship
    #[serde(default)]
    pub dependency_type: DependencyType,

    /// When the dependency was created
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    /// Create a new dependency with an unassigned id.
    pub fn new(item_id: u64, depends_on_id: u64, dependency_type: DependencyType) -> Self {
        Self {
            id: 0,
            entity_type: "dependency".to_string(),
            item_id,
            depends_on_id,
            dependency_type,
            created_at: Utc::now(),
        }
    }

    /// Whether this dependency touches the given item on either end.
    pub fn involves(&self, item_id: u64) -> bool {
        self.item_id == item_id || self.depends_on_id == item_id
    }
}

impl Record for Dependency {
    const KIND: &'static str = "dependency";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Input for capturing a new item.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub decision: String,
    pub context: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
}

/// Partial update of an item. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub decision: Option<String>,
    /// `Some(None)` clears the context.
    pub context: Option<Option<String>>,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.decision.is_none()
            && self.context.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
    }
}

/// Filter for listing items. Empty filter lists every non-archived item.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    /// Every listed tag must be present on the item.
    pub tags: Vec<String>,
    /// Case-insensitive substring match on decision or context.
    pub text: Option<String>,
    pub include_archived: bool,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        match self.status {
            Some(status) if item.status != status => return false,
            None if item.status == ItemStatus::Archived && !self.include_archived => return false,
            _ => {}
        }
        if let Some(priority) = self.priority {
            if item.priority != priority {
                return false;
            }
        }
        if !self
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .all(|t| item.tags.contains(&t))
        {
            return false;
        }
        if let Some(ref text) = self.text {
            let needle = text.to_lowercase();
            let in_decision = item.decision.to_lowercase().contains(&needle);
            let in_context = item
                .context
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle));
            if !in_decision && !in_context {
                return false;
            }
        }
        true
    }
}

/// Field to sort listed items by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Id,
    Created,
    Updated,
    Priority,
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "id" => Ok(SortField::Id),
            "created" | "created_at" => Ok(SortField::Created),
            "updated" | "updated_at" => Ok(SortField::Updated),
            "priority" => Ok(SortField::Priority),
            _ => Err(format!("Invalid sort field: {}", s)),
        }
    }
}

/// Sort order for listing items.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemSort {
    pub field: SortField,
    pub descending: bool,
}

impl ItemSort {
    /// Sort items in place. Ties fall back to ascending id.
    pub fn apply(&self, items: &mut [Item]) {
        items.sort_by(|a, b| {
            let ord = match self.field {
                SortField::Id => a.id.cmp(&b.id),
                SortField::Created => a.created_at.cmp(&b.created_at),
                SortField::Updated => a.updated_at.cmp(&b.updated_at),
                SortField::Priority => a.priority.cmp(&b.priority),
            };
            let ord = if self.descending { ord.reverse() } else { ord };
            ord.then(a.id.cmp(&b.id))
        });
    }
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A page of listed items.
#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<Item>,
    /// Number of matching items before pagination
    pub total: usize,
}

/// Normalize tags: trim, lowercase, drop empties, deduplicate preserving order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
