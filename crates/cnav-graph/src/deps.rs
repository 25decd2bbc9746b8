//! File dependency graph: includer → includee edges with contributor sets.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

use cnav_core::{DependencyMode, FileId};

/// Directed inclusion graph over `FileId`s backed by petgraph.
///
/// Each edge carries the set of primary files whose translation units
/// reported it; an edge disappears when its last contributor retracts.
/// Forward neighbors answer "what does this file include", incoming
/// neighbors answer "who includes this file", so the reverse-dependency
/// mirror holds by construction.
pub struct DependencyGraph {
    graph: DiGraph<FileId, HashSet<FileId>>,
    index: HashMap<FileId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    fn node(&mut self, file: FileId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&file) {
            return idx;
        }
        let idx = self.graph.add_node(file);
        self.index.insert(file, idx);
        idx
    }

    /// Record `includer → includee` on behalf of `contributor`.
    pub fn add_edge(&mut self, includer: FileId, includee: FileId, contributor: FileId) {
        let a = self.node(includer);
        let b = self.node(includee);
        if let Some(e) = self.graph.find_edge(a, b) {
            self.graph[e].insert(contributor);
        } else {
            let mut contributors = HashSet::new();
            contributors.insert(contributor);
            self.graph.add_edge(a, b, contributors);
        }
    }

    /// Withdraw `contributor`'s claim on `includer → includee`; the edge is
    /// dropped once nobody claims it.
    pub fn retract_edge(&mut self, includer: FileId, includee: FileId, contributor: FileId) {
        let (Some(&a), Some(&b)) = (self.index.get(&includer), self.index.get(&includee)) else {
            return;
        };
        if let Some(e) = self.graph.find_edge(a, b) {
            let contributors = &mut self.graph[e];
            contributors.remove(&contributor);
            if contributors.is_empty() {
                self.graph.remove_edge(e);
            }
        }
    }

    /// Drop every outgoing edge of `file`, all contributors included. Used
    /// when a changed file's facts are scrubbed ahead of a re-merge.
    pub fn remove_outgoing(&mut self, file: FileId) {
        let Some(&idx) = self.index.get(&file) else {
            return;
        };
        while let Some(e) = self.graph.first_edge(idx, Direction::Outgoing) {
            self.graph.remove_edge(e);
        }
    }

    fn direction(mode: DependencyMode) -> Direction {
        match mode {
            DependencyMode::ArgDependsOn => Direction::Outgoing,
            DependencyMode::DependsOnArg => Direction::Incoming,
        }
    }

    /// Direct neighbors in the given direction.
    pub fn direct(&self, file: FileId, mode: DependencyMode) -> HashSet<FileId> {
        let Some(&idx) = self.index.get(&file) else {
            return HashSet::new();
        };
        self.graph
            .neighbors_directed(idx, Self::direction(mode))
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect()
    }

    /// Transitive closure via BFS, including `file` itself.
    pub fn closure(&self, file: FileId, mode: DependencyMode) -> HashSet<FileId> {
        let mut result = HashSet::new();
        result.insert(file);
        let Some(&start) = self.index.get(&file) else {
            return result;
        };
        let direction = Self::direction(mode);
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(current, direction) {
                if visited.insert(neighbor) {
                    if let Some(&f) = self.graph.node_weight(neighbor) {
                        result.insert(f);
                    }
                    queue.push_back(neighbor);
                }
            }
        }
        result
    }

    /// All edges as (includer, includee) pairs.
    pub fn edges(&self) -> Vec<(FileId, FileId)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((*self.graph.node_weight(a)?, *self.graph.node_weight(b)?))
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
