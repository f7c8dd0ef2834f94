//! Graph algorithms for item dependency analysis.
//!
//! The graph is rebuilt from a full snapshot of items and dependencies for
//! every request and then discarded. Nodes are item ids; an edge `u -> v`
//! means "u depends on v". Only blocking dependency types become edges.
//!
//! All traversals use explicit stacks so deep chains cannot exhaust the
//! call stack.

use crate::models::{Dependency, Item, ItemStatus, Priority};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
struct GraphNode {
    status: ItemStatus,
    priority: Priority,
}

/// The longest blocking path reachable from an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyChain {
    pub item_id: u64,
    /// Number of edges in the chain
    pub depth: usize,
    /// Item ids from the starting item down to the deepest prerequisite
    pub chain: Vec<u64>,
}

/// A non-terminal item with at least one unresolved blocker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedItem {
    pub item_id: u64,
    /// Unresolved items this one depends on directly
    pub direct_blockers: Vec<u64>,
    /// Every unresolved item reachable through unresolved blockers
    pub transitive_blockers: Vec<u64>,
    /// True when none of the direct blockers are themselves blocked
    pub directly_unblockable: bool,
}

/// In-memory dependency graph keyed by item id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<u64, GraphNode>,
    /// Forward adjacency: item -> items it depends on
    dependencies: HashMap<u64, Vec<u64>>,
    /// Reverse adjacency: item -> items that depend on it
    dependents: HashMap<u64, Vec<u64>>,
}

impl DependencyGraph {
    /// Build a graph from the complete current item and dependency sets.
    ///
    /// Non-blocking dependencies, self-references, and edges naming an
    /// unknown item are ignored.
    pub fn build(items: &[Item], dependencies: &[Dependency]) -> Self {
        let nodes: BTreeMap<u64, GraphNode> = items
            .iter()
            .map(|item| {
                (
                    item.id,
                    GraphNode {
                        status: item.status,
                        priority: item.priority,
                    },
                )
            })
            .collect();

        let mut forward: HashMap<u64, BTreeSet<u64>> = HashMap::new();
        let mut reverse: HashMap<u64, BTreeSet<u64>> = HashMap::new();
        for dep in dependencies {
            if !dep.dependency_type.is_blocking() || dep.item_id == dep.depends_on_id {
                continue;
            }
            if !nodes.contains_key(&dep.item_id) || !nodes.contains_key(&dep.depends_on_id) {
                continue;
            }
            forward
                .entry(dep.item_id)
                .or_default()
                .insert(dep.depends_on_id);
            reverse
                .entry(dep.depends_on_id)
                .or_default()
                .insert(dep.item_id);
        }

        Self {
            nodes,
            dependencies: forward
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            dependents: reverse
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Items `id` depends on through blocking edges, ascending.
    pub fn dependencies_of(&self, id: u64) -> &[u64] {
        self.dependencies.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items that depend on `id` through blocking edges, ascending.
    pub fn dependents_of(&self, id: u64) -> &[u64] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_unresolved(&self, id: u64) -> bool {
        self.nodes.get(&id).is_some_and(|n| !n.status.is_terminal())
    }

    fn unresolved_blockers(&self, id: u64) -> Vec<u64> {
        self.dependencies_of(id)
            .iter()
            .copied()
            .filter(|b| self.is_unresolved(*b))
            .collect()
    }

    /// Sort key putting high priority first, then lower id.
    fn priority_key(&self, id: u64) -> (Reverse<Priority>, u64) {
        let priority = self.nodes.get(&id).map(|n| n.priority).unwrap_or_default();
        (Reverse(priority), id)
    }

    /// Would adding `from -> to` close a cycle in the committed graph?
    ///
    /// Searches for an existing path from `to` back to `from`. The graph is
    /// never modified.
    pub fn would_create_cycle(&self, from: u64, to: u64) -> bool {
        if from == to {
            return true;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for &next in self.dependencies_of(current) {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }

        false
    }

    /// Every non-terminal item exactly once, each after all of its
    /// non-terminal blocking dependencies.
    ///
    /// Post-order depth-first topological sort. Roots and siblings are
    /// visited high priority first, so unconstrained items surface by
    /// priority.
    pub fn resolution_order(&self) -> Vec<u64> {
        let children: HashMap<u64, Vec<u64>> = self
            .nodes
            .keys()
            .filter(|id| self.is_unresolved(**id))
            .map(|&id| {
                let mut deps = self.unresolved_blockers(id);
                deps.sort_by_key(|d| self.priority_key(*d));
                (id, deps)
            })
            .collect();

        let mut roots: Vec<u64> = children.keys().copied().collect();
        roots.sort_by_key(|id| self.priority_key(*id));

        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(roots.len());

        for root in roots {
            if !visited.insert(root) {
                continue;
            }
            let mut stack: Vec<(u64, usize)> = vec![(root, 0)];
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let kids = children.get(&node).map(Vec::as_slice).unwrap_or(&[]);
                if frame.1 < kids.len() {
                    let child = kids[frame.1];
                    frame.1 += 1;
                    if visited.insert(child) {
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    order.push(node);
                }
            }
        }

        order
    }

    /// The longest chain of blocking dependencies starting at `id`.
    ///
    /// Returns `None` if `id` is not in the graph. Each node's best depth is
    /// memoized; nodes on the current path are skipped so a persisted cycle
    /// cannot loop forever. Equal-depth branches resolve to the lower id.
    pub fn dependency_chain(&self, id: u64) -> Option<DependencyChain> {
        if !self.contains(id) {
            return None;
        }

        // node -> (depth, next hop on its longest chain)
        let mut memo: HashMap<u64, (usize, Option<u64>)> = HashMap::new();
        let mut on_path: HashSet<u64> = HashSet::from([id]);
        let mut stack: Vec<(u64, usize)> = vec![(id, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let deps = self.dependencies_of(node);
            if frame.1 < deps.len() {
                let dep = deps[frame.1];
                frame.1 += 1;
                if !memo.contains_key(&dep) && on_path.insert(dep) {
                    stack.push((dep, 0));
                }
                continue;
            }

            stack.pop();
            on_path.remove(&node);
            let mut best: (usize, Option<u64>) = (0, None);
            for &dep in deps {
                if let Some(&(depth, _)) = memo.get(&dep) {
                    if best.1.is_none() || depth + 1 > best.0 {
                        best = (depth + 1, Some(dep));
                    }
                }
            }
            memo.insert(node, best);
        }

        let depth = memo.get(&id).map(|m| m.0).unwrap_or(0);
        let mut chain = vec![id];
        let mut cursor = memo.get(&id).and_then(|m| m.1);
        while let Some(next) = cursor {
            chain.push(next);
            cursor = memo.get(&next).and_then(|m| m.1);
        }

        Some(DependencyChain {
            item_id: id,
            depth,
            chain,
        })
    }

    /// Dependents of `id` whose only unresolved blocker is `id` itself.
    pub fn items_unblocked_by(&self, id: u64) -> Vec<u64> {
        if !self.is_unresolved(id) {
            return Vec::new();
        }
        self.dependents_of(id)
            .iter()
            .copied()
            .filter(|&dependent| {
                self.is_unresolved(dependent)
                    && self
                        .dependencies_of(dependent)
                        .iter()
                        .all(|&b| b == id || !self.is_unresolved(b))
            })
            .collect()
    }

    /// Every non-terminal item with at least one unresolved direct blocker.
    pub fn blocked_items(&self) -> Vec<BlockedItem> {
        let mut blocked = Vec::new();

        for &id in self.nodes.keys() {
            if !self.is_unresolved(id) {
                continue;
            }
            let direct = self.unresolved_blockers(id);
            if direct.is_empty() {
                continue;
            }

            let directly_unblockable = direct
                .iter()
                .all(|&b| self.unresolved_blockers(b).is_empty());

            blocked.push(BlockedItem {
                item_id: id,
                transitive_blockers: self.transitive_blockers(id),
                direct_blockers: direct,
                directly_unblockable,
            });
        }

        blocked
    }

    /// All unresolved items reachable through unresolved blockers, ascending.
    pub fn transitive_blockers(&self, id: u64) -> Vec<u64> {
        let mut seen: BTreeSet<u64> = BTreeSet::new();
        let mut stack = self.unresolved_blockers(id);

        while let Some(current) = stack.pop() {
            if current == id || !seen.insert(current) {
                continue;
            }
            for next in self.unresolved_blockers(current) {
                if !seen.contains(&next) {
                    stack.push(next);
                }
            }
        }

        seen.into_iter().collect()
    }
}
