//! Join path resolution over the dataset graph.
//!
//! Datasets are nodes; every foreign key contributes an edge in both
//! directions. The resolver answers three questions for the compiler and
//! the UI:
//!
//! - which edges can be walked next from a dataset (minus edges already
//!   used on the current path, minus the reverse of the edge just
//!   traversed),
//! - what the first discovered route between two datasets is (BFS), and
//! - which datasets cannot be reached from the view's base dataset at all
//!   (surfaced as "unlinked", never an error).
//!
//! Paths are composed with `merge_paths`/`reverse_paths` when walking
//! outward from an intermediate dataset, and are identified on the wire by
//! a deterministic base-36 alias.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::model::field::Field;

/// A foreign-key edge between two datasets: `from.fid = to.tid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinPath {
    pub from: String,
    pub fid: String,
    pub to: String,
    pub tid: String,
}

impl JoinPath {
    pub fn new(
        from: impl Into<String>,
        fid: impl Into<String>,
        to: impl Into<String>,
        tid: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            fid: fid.into(),
            to: to.into(),
            tid: tid.into(),
        }
    }

    /// The same edge walked in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            fid: self.tid.clone(),
            to: self.from.clone(),
            tid: self.fid.clone(),
        }
    }
}

/// Concatenate a path, cancelling steps that immediately backtrack the
/// previous one.
pub fn merge_paths(paths: &[JoinPath]) -> Vec<JoinPath> {
    let mut result: Vec<JoinPath> = Vec::new();
    for step in paths {
        if let Some(last) = result.last() {
            if *step == last.reversed() {
                result.pop();
                continue;
            }
        }
        result.push(step.clone());
    }
    result
}

/// Reverse a path: last edge first, every edge inverted.
pub fn reverse_paths(paths: &[JoinPath]) -> Vec<JoinPath> {
    paths.iter().rev().map(JoinPath::reversed).collect()
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits")
}

/// Deterministic alias of a join path, used to namespace joined columns.
pub fn path_alias(path: &[JoinPath]) -> String {
    let text = path
        .iter()
        .map(|p| format!("{}_{}_{}_{}", p.from, p.fid, p.to, p.tid))
        .collect::<Vec<_>>()
        .join("_");
    to_base36(fnv1a(&text))
}

/// Alias of the empty path, i.e. the view's base dataset.
pub fn base_alias() -> String {
    path_alias(&[])
}

/// Key fields of an edge, stored on the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EdgeKeys {
    fid: String,
    tid: String,
}

/// Adjacency index of join paths keyed by dataset.
#[derive(Debug, Default)]
pub struct RouteMap {
    graph: DiGraph<String, EdgeKeys>,
    index: HashMap<String, NodeIndex>,
}

impl RouteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from field metadata: every field carrying a foreign
    /// key contributes one edge in each direction, deduplicated per
    /// dataset by key field. Datasets without any foreign key still get a
    /// node, so they show up as unlinked instead of vanishing.
    pub fn from_fields(fields: &[Field]) -> Self {
        let mut map = Self::new();
        let mut seen: HashSet<JoinPath> = HashSet::new();
        for field in fields {
            if let Some(dataset) = &field.dataset {
                map.node(dataset);
            }
            let (Some(dataset), Some(foreign)) = (&field.dataset, &field.foreign) else {
                continue;
            };
            let edge = JoinPath::new(dataset, &field.fid, &foreign.dataset, &foreign.fid);
            for e in [edge.reversed(), edge] {
                if seen.insert(e.clone()) {
                    map.add_edge(&e);
                }
            }
        }
        map
    }

    fn node(&mut self, dataset: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(dataset) {
            return *idx;
        }
        let idx = self.graph.add_node(dataset.to_string());
        self.index.insert(dataset.to_string(), idx);
        idx
    }

    fn add_edge(&mut self, edge: &JoinPath) {
        let from = self.node(&edge.from);
        let to = self.node(&edge.to);
        self.graph.add_edge(
            from,
            to,
            EdgeKeys {
                fid: edge.fid.clone(),
                tid: edge.tid.clone(),
            },
        );
    }

    /// All datasets known to the map.
    pub fn datasets(&self) -> Vec<String> {
        self.graph.node_weights().cloned().collect()
    }

    /// Outgoing edges from a dataset.
    pub fn edges_from(&self, dataset: &str) -> Vec<JoinPath> {
        let Some(idx) = self.index.get(dataset) else {
            return Vec::new();
        };
        self.graph
            .edges(*idx)
            .map(|e| {
                JoinPath::new(
                    dataset,
                    &e.weight().fid,
                    &self.graph[e.target()],
                    &e.weight().tid,
                )
            })
            .collect()
    }

    /// Edges that can extend the current path from `at`.
    ///
    /// `banned` holds the edges already used on this path; the reverse of
    /// `arrived_by` is blocked as well so the walk never immediately
    /// backtracks. Both sets are owned by the caller, so concurrent
    /// traversals share nothing.
    pub fn next_paths(
        &self,
        at: &str,
        banned: &HashSet<JoinPath>,
        arrived_by: Option<&JoinPath>,
    ) -> Vec<JoinPath> {
        let reverse = arrived_by.map(JoinPath::reversed);
        self.edges_from(at)
            .into_iter()
            .filter(|e| !banned.contains(e))
            .filter(|e| reverse.as_ref() != Some(e))
            .collect()
    }

    /// First discovered route between two datasets (BFS over the map).
    ///
    /// Returns `Some(vec![])` when `from == to` and `None` when `to` is
    /// unreachable.
    pub fn route(&self, from: &str, to: &str) -> Option<Vec<JoinPath>> {
        let from_idx = *self.index.get(from)?;
        if from == to {
            return Some(Vec::new());
        }
        let to_idx = *self.index.get(to)?;

        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent: HashMap<NodeIndex, (NodeIndex, JoinPath)> = HashMap::new();

        queue.push_back(from_idx);
        visited.insert(from_idx);

        while let Some(current) = queue.pop_front() {
            if current == to_idx {
                return Some(self.reconstruct(from_idx, to_idx, &parent));
            }
            for edge in self.graph.edges(current) {
                let neighbor = edge.target();
                if visited.insert(neighbor) {
                    let step = JoinPath::new(
                        &self.graph[current],
                        &edge.weight().fid,
                        &self.graph[neighbor],
                        &edge.weight().tid,
                    );
                    parent.insert(neighbor, (current, step));
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    fn reconstruct(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        parent: &HashMap<NodeIndex, (NodeIndex, JoinPath)>,
    ) -> Vec<JoinPath> {
        let mut steps = Vec::new();
        let mut current = to;
        while current != from {
            let (prev, step) = parent
                .get(&current)
                .expect("parent entry exists for every visited node");
            steps.push(step.clone());
            current = *prev;
        }
        steps.reverse();
        steps
    }

    /// Datasets reachable from `base`, including `base` itself.
    pub fn reachable_from(&self, base: &str) -> HashSet<String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(base.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(base.to_string());
        while let Some(now) = queue.pop_front() {
            for edge in self.edges_from(&now) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to);
                }
            }
        }
        visited
    }

    /// Datasets in the map that cannot be reached from `base`.
    pub fn unlinked(&self, base: &str) -> Vec<String> {
        let reachable = self.reachable_from(base);
        let mut out: Vec<String> = self
            .datasets()
            .into_iter()
            .filter(|d| !reachable.contains(d))
            .collect();
        out.sort();
        out
    }
}
