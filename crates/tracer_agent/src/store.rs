//! In-memory cache of instrumentation data reported by the tracer.
//!
//! Holds the code-location nodes discovered in the page, a per-file index
//! over them, invocation records, and cumulative hit counts. Everything here
//! is scoped to one connection: [`InstrumentationStore::reset`] is called by
//! the connection machine whenever the page or the inspector link goes away.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

// ============================================================================
// Data Model
// ============================================================================

/// A line/column position inside a source file.
///
/// The origin (0- or 1-based) is whatever the tracer reports. Positions are
/// only ever compared with each other, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then(self.column.cmp(&other.column))
    }
}

/// Node discriminator as reported by the tracer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Function,
    CallSite,
    /// Any variant this crate does not know about
    Other(String),
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "function" => NodeKind::Function,
            "callsite" => NodeKind::CallSite,
            _ => NodeKind::Other(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Function => "function".to_string(),
            NodeKind::CallSite => "callsite".to_string(),
            NodeKind::Other(s) => s,
        }
    }
}

/// A discovered code location (function or call site)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque id assigned by the tracer, unique per connection
    pub id: String,
    /// Source file path
    pub path: String,
    pub start: Position,
    pub end: Position,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Node {
    pub fn is_function(&self) -> bool {
        self.kind == NodeKind::Function
    }

    /// Whether `pos` falls inside `[start, end)`
    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A single recorded invocation of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Hit counts keyed by node id, split the way the tracer reports them.
///
/// Used both for running totals and for the deltas returned by one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitCounts {
    #[serde(default)]
    pub functions: HashMap<String, u64>,
    #[serde(default)]
    pub call_sites: HashMap<String, u64>,
}

impl HitCounts {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.call_sites.is_empty()
    }

    /// Running total for a node id, looked up in both sub-maps
    pub fn total(&self, id: &str) -> u64 {
        let functions = self.functions.get(id).copied().unwrap_or(0);
        let call_sites = self.call_sites.get(id).copied().unwrap_or(0);
        functions.saturating_add(call_sites)
    }

    fn merge(&mut self, deltas: &HitCounts) {
        for (id, delta) in &deltas.functions {
            let total = self.functions.entry(id.clone()).or_insert(0);
            *total = total.saturating_add(*delta);
        }
        for (id, delta) in &deltas.call_sites {
            let total = self.call_sites.entry(id.clone()).or_insert(0);
            *total = total.saturating_add(*delta);
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Connection-scoped instrumentation cache
#[derive(Debug, Default)]
pub struct InstrumentationStore {
    nodes: HashMap<String, Node>,
    /// path -> node ids, in insertion order
    nodes_by_path: HashMap<String, Vec<String>>,
    invocations: HashMap<String, Invocation>,
    hit_counts: HitCounts,
}

impl InstrumentationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert nodes by id and index them by file path.
    ///
    /// A node whose id is already known replaces the stored one. It keeps its
    /// slot in the file bucket, unless the path changed, in which case it moves
    /// to the end of the new path's bucket. A bucket never holds an id twice.
    pub fn add_nodes<I>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = Node>,
    {
        for node in nodes {
            if let Some(previous) = self.nodes.get(&node.id) {
                if previous.path != node.path {
                    if let Some(bucket) = self.nodes_by_path.get_mut(&previous.path) {
                        bucket.retain(|id| id != &node.id);
                    }
                    self.index_by_path(&node);
                }
            } else {
                self.index_by_path(&node);
            }
            trace!(id = %node.id, path = %node.path, "Stored node");
            self.nodes.insert(node.id.clone(), node);
        }
    }

    fn index_by_path(&mut self, node: &Node) {
        self.nodes_by_path
            .entry(node.path.clone())
            .or_default()
            .push(node.id.clone());
    }

    pub fn function_with_id(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Function nodes in `path`, in insertion order
    pub fn functions_in_file(&self, path: &str) -> Vec<&Node> {
        self.nodes_by_path
            .get(path)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.nodes.get(id))
                    .filter(|n| n.is_function())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Functions in `path` containing the position, outermost first.
    ///
    /// Sorted by start position only, so the last element is the innermost
    /// enclosing function for well-nested data.
    pub fn functions_containing(&self, path: &str, line: u32, column: u32) -> Vec<&Node> {
        let pos = Position::new(line, column);
        let mut funcs: Vec<&Node> = self
            .functions_in_file(path)
            .into_iter()
            .filter(|n| n.contains(pos))
            .collect();
        funcs.sort_by(|a, b| a.start.cmp(&b.start));
        funcs
    }

    pub fn add_invocations<I>(&mut self, invocations: I)
    where
        I: IntoIterator<Item = Invocation>,
    {
        for invocation in invocations {
            self.invocations.insert(invocation.id.clone(), invocation);
        }
    }

    pub fn invocation_with_id(&self, id: &str) -> Option<&Invocation> {
        self.invocations.get(id)
    }

    /// Add reported deltas to the running totals
    pub fn merge_hit_count_deltas(&mut self, deltas: &HitCounts) {
        self.hit_counts.merge(deltas);
    }

    pub fn hit_counts(&self) -> &HitCounts {
        &self.hit_counts
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node, index entry, invocation and hit count
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
