//! Dependency graph over deployable units
//!
//! Edges point from a unit to the unit it depends on. The graph is kept
//! acyclic at all times: an edge that would close a cycle is rejected before
//! insertion and the graph is left untouched.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// A declared "`from` depends on `to`" relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
struct EdgeData {
    reason: Option<String>,
    /// Insertion sequence; petgraph reorders edges on removal
    seq: u64,
}

/// Unit dependency graph using petgraph
#[derive(Debug, Default)]
pub struct UnitGraph {
    graph: DiGraph<String, EdgeData>,
    /// Unit name -> graph index, in declaration order
    indices: IndexMap<String, NodeIndex>,
    next_seq: u64,
}

impl UnitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.indices.contains_key(unit)
    }

    /// Unit names in declaration order
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    pub fn add_unit(&mut self, name: impl Into<String>) -> Result<(), CoreError> {
        let name = name.into();
        if self.indices.contains_key(&name) {
            return Err(CoreError::DuplicateUnit(name));
        }
        let idx = self.graph.add_node(name.clone());
        self.indices.insert(name, idx);
        Ok(())
    }

    fn index(&self, unit: &str) -> Result<NodeIndex, CoreError> {
        self.indices
            .get(unit)
            .copied()
            .ok_or_else(|| CoreError::UnknownUnit(unit.to_string()))
    }

    /// Declare that `from` depends on `to`
    ///
    /// Fails with [`CoreError::CyclicDependency`] when `to` already reaches
    /// `from`; the reported cycle starts and ends at `from`. Re-declaring an
    /// existing edge keeps the first reason unless it had none.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        reason: Option<String>,
    ) -> Result<(), CoreError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;

        if from_idx == to_idx {
            return Err(CoreError::CyclicDependency {
                cycle: vec![from.to_string(), from.to_string()],
            });
        }

        if let Some(edge) = self.graph.find_edge(from_idx, to_idx) {
            let data = &mut self.graph[edge];
            if data.reason.is_none() {
                data.reason = reason;
            }
            return Ok(());
        }

        if let Some(path) = self.path_between(to_idx, from_idx) {
            let mut cycle = vec![from.to_string()];
            cycle.extend(path.into_iter().map(|idx| self.graph[idx].clone()));
            return Err(CoreError::CyclicDependency { cycle });
        }

        debug!("Unit '{}' depends on '{}' ({:?})", from, to, reason);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.graph.add_edge(from_idx, to_idx, EdgeData { reason, seq });
        Ok(())
    }

    /// Remove the edge `from -> to`, returning whether it existed
    pub fn remove_edge(&mut self, from: &str, to: &str) -> Result<bool, CoreError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        match self.graph.find_edge(from_idx, to_idx) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shortest path `start -> ... -> goal` following dependency edges
    fn path_between(&self, start: NodeIndex, goal: NodeIndex) -> Option<Vec<NodeIndex>> {
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut seen: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![goal];
                let mut cursor = goal;
                while let Some(&prev) = previous.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.sorted_neighbors(current, Direction::Outgoing) {
                if seen.insert(next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Neighbors ordered by edge insertion, for deterministic traversal
    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self.graph.edges_directed(idx, direction).collect();
        edges.sort_by_key(|e| e.weight().seq);
        edges
            .into_iter()
            .map(|e| match direction {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            })
            .collect()
    }

    /// Whether `from` depends on `to`, directly or transitively
    pub fn depends_on(&self, from: &str, to: &str) -> Result<bool, CoreError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        if from_idx == to_idx {
            return Ok(false);
        }
        Ok(has_path_connecting(&self.graph, from_idx, to_idx, None))
    }

    /// Direct dependencies of `unit` with their reasons, in declaration order
    pub fn dependencies_of(&self, unit: &str) -> Result<Vec<DependencyEdge>, CoreError> {
        let idx = self.index(unit)?;
        let mut edges: Vec<_> = self.graph.edges(idx).collect();
        edges.sort_by_key(|e| e.weight().seq);
        Ok(edges
            .into_iter()
            .map(|e| DependencyEdge {
                from: unit.to_string(),
                to: self.graph[e.target()].clone(),
                reason: e.weight().reason.clone(),
            })
            .collect())
    }

    /// Every edge in declaration order
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self.graph.edge_references().collect();
        edges.sort_by_key(|e| e.weight().seq);
        edges
            .into_iter()
            .map(|e| DependencyEdge {
                from: self.graph[e.source()].clone(),
                to: self.graph[e.target()].clone(),
                reason: e.weight().reason.clone(),
            })
            .collect()
    }

    /// Verify the graph has no cycle, reporting the first one found
    pub fn check_acyclic(&self) -> Result<(), CoreError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &UnitGraph,
            idx: NodeIndex,
            colors: &mut HashMap<NodeIndex, Color>,
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            colors.insert(idx, Color::Gray);
            stack.push(idx);
            for next in graph.sorted_neighbors(idx, Direction::Outgoing) {
                match colors.get(&next).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = visit(graph, next, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
            stack.pop();
            colors.insert(idx, Color::Black);
            None
        }

        let mut colors = HashMap::new();
        for &idx in self.indices.values() {
            if colors.contains_key(&idx) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, idx, &mut colors, &mut stack) {
                return Err(CoreError::CyclicDependency {
                    cycle: cycle.into_iter().map(|i| self.graph[i].clone()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Units ordered so every unit follows all of its dependencies
    ///
    /// Among units whose dependencies are all emitted, the one declared first
    /// goes next, so an unchanged graph always yields the same order.
    pub fn topological_order(&self) -> Result<Vec<String>, CoreError> {
        let position: HashMap<NodeIndex, usize> = self
            .indices
            .values()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        let mut remaining: HashMap<NodeIndex, usize> = self
            .indices
            .values()
            .map(|&idx| (idx, self.graph.edges(idx).count()))
            .collect();

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(idx, _)| position[idx])
            .collect();

        let by_position: Vec<NodeIndex> = self.indices.values().copied().collect();
        let mut order = Vec::with_capacity(self.indices.len());

        while let Some(pos) = ready.pop_first() {
            let idx = by_position[pos];
            order.push(self.graph[idx].clone());

            for dependent in self.sorted_neighbors(idx, Direction::Incoming) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(position[&dependent]);
                    }
                }
            }
        }

        if order.len() != self.indices.len() {
            self.check_acyclic()?;
            return Err(CoreError::CyclicDependency {
                cycle: Vec::new(),
            });
        }

        Ok(order)
    }
}
