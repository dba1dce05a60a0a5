//! Name-keyed DAG of batteries and policies.
//!
//! The directory is the only owner of long-lived nodes. Composite nodes
//! refer to their sources by name and resolve them through a [`Lookup`];
//! parent links are stored here, and children are derived by scanning.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::battery::{Battery, BatteryKind};
use crate::error::{BosError, Result};
use crate::policy::{PolicyKind, SplitterPolicy};

/// A node stored in the directory.
#[derive(Clone)]
pub enum Node {
    Battery(Arc<dyn Battery>),
    Policy(Arc<dyn SplitterPolicy>),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Battery(b) => NodeKind::Battery(b.kind()),
            Node::Policy(p) => NodeKind::Policy(p.kind()),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Battery(b) => write!(f, "Battery({}: {})", b.name(), b.kind()),
            Node::Policy(p) => write!(f, "Policy({}: {})", p.name(), p.kind()),
        }
    }
}

/// Variant tag of a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "node", content = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Battery(BatteryKind),
    Policy(PolicyKind),
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Battery(k) => write!(f, "{k}"),
            NodeKind::Policy(k) => write!(f, "{k} policy"),
        }
    }
}

/// One row of [`BosDirectory::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub kind: NodeKind,
    pub parents: Vec<String>,
}

struct DirectoryEntry {
    node: Node,
    parents: BTreeSet<String>,
}

/// The DAG of names to node and parent set.
///
/// A parent is a node this one draws from. A battery may be the parent of
/// at most one node (it is then in use); a policy may be the parent of any
/// number of splitter batteries.
#[derive(Default)]
pub struct BosDirectory {
    entries: BTreeMap<String, DirectoryEntry>,
    /// Names reserved by a teardown in progress.
    retiring: BTreeSet<String>,
}

impl BosDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registers `node` under `name`, drawing from `parents`.
    ///
    /// # Errors
    ///
    /// - `NameTaken` if `name` already exists
    /// - `BadName` if a parent does not exist
    /// - `BatteryInUse` if a battery parent already feeds another node, or a
    ///   parent is reserved for teardown
    pub fn add_node(&mut self, name: &str, node: Node, parents: &[String]) -> Result<()> {
        if self.contains(name) {
            return Err(BosError::NameTaken(name.to_string()));
        }
        for parent in parents {
            if self.retiring.contains(parent) {
                return Err(BosError::BatteryInUse(parent.clone()));
            }
            let entry = self
                .entries
                .get(parent)
                .ok_or_else(|| BosError::BadName(parent.clone()))?;
            if matches!(entry.node, Node::Battery(_)) && !self.is_free(parent) {
                return Err(BosError::BatteryInUse(parent.clone()));
            }
        }
        self.entries.insert(
            name.to_string(),
            DirectoryEntry {
                node,
                parents: parents.iter().cloned().collect(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Node> {
        self.entries.get(name).map(|e| e.node.clone())
    }

    /// Names this node draws from.
    ///
    /// # Errors
    ///
    /// Returns `BadName` if `name` does not exist.
    pub fn get_parents(&self, name: &str) -> Result<Vec<String>> {
        self.entries
            .get(name)
            .map(|e| e.parents.iter().cloned().collect())
            .ok_or_else(|| BosError::BadName(name.to_string()))
    }

    /// Names of the nodes drawing from `name`.
    ///
    /// # Errors
    ///
    /// Returns `BadName` if `name` does not exist.
    pub fn get_children(&self, name: &str) -> Result<Vec<String>> {
        if !self.contains(name) {
            return Err(BosError::BadName(name.to_string()));
        }
        Ok(self.children_of(name))
    }

    fn children_of(&self, name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.parents.contains(name))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// A node is free when nothing draws from it.
    pub fn is_free(&self, name: &str) -> bool {
        !self.entries.values().any(|e| e.parents.contains(name))
    }

    pub fn list(&self) -> Vec<NodeInfo> {
        self.entries
            .iter()
            .map(|(name, e)| NodeInfo {
                name: name.clone(),
                kind: e.node.kind(),
                parents: e.parents.iter().cloned().collect(),
            })
            .collect()
    }

    /// Computes the removal order for the subtree rooted at `name`.
    ///
    /// Children come first, the root last. Nothing is removed.
    ///
    /// # Errors
    ///
    /// - `BadName` if `name` does not exist
    /// - `BatteryInUse` if any child itself has children
    pub fn teardown_plan(&self, name: &str) -> Result<Vec<String>> {
        let children = self.get_children(name)?;
        for child in &children {
            if !self.is_free(child) {
                return Err(BosError::BatteryInUse(child.clone()));
            }
        }
        let mut plan = children;
        plan.push(name.to_string());
        Ok(plan)
    }

    /// Computes the teardown plan of `name` and reserves every node in it.
    ///
    /// Until [`release`](Self::release) or [`remove_all`](Self::remove_all),
    /// reserved nodes cannot gain children and cannot be reserved again, so
    /// the plan stays valid while the caller unhooks the subtree.
    ///
    /// # Errors
    ///
    /// As [`teardown_plan`](Self::teardown_plan), plus `BatteryInUse` if a
    /// node in the plan is already reserved.
    pub fn reserve_teardown(&mut self, name: &str) -> Result<Vec<String>> {
        let plan = self.teardown_plan(name)?;
        if let Some(busy) = plan.iter().find(|n| self.retiring.contains(*n)) {
            return Err(BosError::BatteryInUse(busy.clone()));
        }
        self.retiring.extend(plan.iter().cloned());
        Ok(plan)
    }

    /// Drops the reservation on `plan` without removing anything.
    pub fn release(&mut self, plan: &[String]) {
        for name in plan {
            self.retiring.remove(name);
        }
    }

    /// Removes every name in `plan`, returning the removed nodes.
    pub fn remove_all(&mut self, plan: &[String]) -> Vec<Node> {
        self.release(plan);
        plan.iter()
            .filter_map(|name| self.entries.remove(name).map(|e| e.node))
            .collect()
    }
}

type Resolver = dyn Fn(&str) -> Option<Node> + Send + Sync;

/// Cloneable name resolver handed to composite nodes.
///
/// Composites store only names and resolve them on every call, so a node
/// never owns its siblings and the directory stays the single owner.
#[derive(Clone)]
pub struct Lookup {
    resolve: Arc<Resolver>,
}

impl Lookup {
    pub fn new(resolve: impl Fn(&str) -> Option<Node> + Send + Sync + 'static) -> Self {
        Self {
            resolve: Arc::new(resolve),
        }
    }

    /// Resolves any node.
    pub fn node(&self, name: &str) -> Result<Node> {
        (self.resolve)(name).ok_or_else(|| BosError::BadName(name.to_string()))
    }

    /// Resolves a battery; policies resolve to `BadName`.
    pub fn battery(&self, name: &str) -> Result<Arc<dyn Battery>> {
        match self.node(name)? {
            Node::Battery(b) => Ok(b),
            Node::Policy(_) => Err(BosError::BadName(name.to_string())),
        }
    }

    /// Resolves a policy; batteries resolve to `BadName`.
    pub fn policy(&self, name: &str) -> Result<Arc<dyn SplitterPolicy>> {
        match self.node(name)? {
            Node::Policy(p) => Ok(p),
            Node::Battery(_) => Err(BosError::BadName(name.to_string())),
        }
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lookup")
    }
}
