//! Loop detection in the thread/nexus connectivity
//!
//! The live threads and nexuses are converted to a plain directed graph with
//! one node per thread and per nexus, separately for the direct and the
//! reverse nexuses. Loops mixing both directions are the normal
//! request/response pattern; a loop made of one direction only can stall.
//!
//! A loop is found by topological reduction: peel every node without incoming
//! edges, repeatedly; reverse what is left and peel again. Whatever survives
//! both passes lies on a loop or between loops.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::triead::{FacetRole, Triead};
use crate::error::{Result, TriesteError};
use crate::nexus::Direction;

/// What a graph node stands for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    Thread(String),
    Nexus(String),
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Thread(name) => write!(f, "thread '{}'", name),
            NodeKind::Nexus(name) => write!(f, "nexus '{}'", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Edges to other nodes, by index
    links: Vec<usize>,
    /// Number of incoming edges
    ninc: usize,
    removed: bool,
}

/// Directed graph of threads and nexuses
#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    nodes: Vec<GraphNode>,
    index: BTreeMap<NodeKind, usize>,
}

impl ConnectivityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for an object
    pub fn node(&mut self, kind: NodeKind) -> usize {
        if let Some(&idx) = self.index.get(&kind) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(GraphNode {
            kind: kind.clone(),
            links: Vec::new(),
            ninc: 0,
            removed: false,
        });
        self.index.insert(kind, idx);
        idx
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.nodes[from].links.push(to);
        self.nodes[to].ninc += 1;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove, repeatedly, every node that has no incoming edges
    pub fn reduce(&mut self) {
        let mut sources: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].removed && self.nodes[i].ninc == 0)
            .collect();
        while let Some(i) = sources.pop() {
            self.nodes[i].removed = true;
            let links = std::mem::take(&mut self.nodes[i].links);
            for t in links {
                self.nodes[t].ninc -= 1;
                if self.nodes[t].ninc == 0 && !self.nodes[t].removed {
                    sources.push(t);
                }
            }
        }
    }

    /// Copy of the remaining graph with every edge turned around
    pub fn reversed(&self) -> Self {
        let mut rev = ConnectivityGraph::new();
        for node in &self.nodes {
            rev.node(node.kind.clone());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for &t in &node.links {
                rev.add_edge(t, i);
            }
        }
        for (i, node) in self.nodes.iter().enumerate() {
            rev.nodes[i].removed = node.removed;
        }
        rev
    }

    pub fn has_edges(&self) -> bool {
        self.nodes.iter().any(|n| !n.links.is_empty())
    }

    /// Nodes still holding edges
    pub fn remaining(&self) -> Vec<&NodeKind> {
        self.nodes
            .iter()
            .filter(|n| !n.links.is_empty())
            .map(|n| &n.kind)
            .collect()
    }

    /// Follow edges from the first node that has any until a node repeats.
    /// Only meaningful on a fully reduced graph, where no walk dead-ends.
    pub fn find_loop(&self) -> Option<Vec<usize>> {
        let start = self.nodes.iter().position(|n| !n.links.is_empty())?;
        let mut on_path: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut path = Vec::new();
        let mut cur = start;
        loop {
            if let Some(pos) = on_path[cur] {
                return Some(path.split_off(pos));
            }
            on_path[cur] = Some(path.len());
            path.push(cur);
            cur = *self.nodes[cur].links.first()?;
        }
    }

    /// Reduce in both directions and describe a surviving loop, if any.
    /// The graph is left reduced.
    pub fn check(&mut self) -> Option<String> {
        self.reduce();
        let mut rev = self.reversed();
        rev.reduce();
        if !rev.has_edges() {
            return None;
        }
        // the reversed graph walks the loop backwards
        let mut cycle = rev.find_loop()?;
        cycle.reverse();
        let lowest = cycle.iter().enumerate().min_by_key(|&(_, n)| *n)?.0;
        cycle.rotate_left(lowest);
        cycle.push(cycle[0]);
        let text: Vec<String> = cycle
            .iter()
            .map(|&i| self.nodes[i].kind.to_string())
            .collect();
        Some(text.join(" -> "))
    }
}

/// Build the graph of one nexus direction from the threads' connections.
///
/// Direct nexus: reader thread -> nexus -> writer thread.
/// Reverse nexus: writer thread -> nexus -> reader thread.
pub fn build_graph(trieads: &[Arc<Triead>], direction: Direction) -> ConnectivityGraph {
    let mut graph = ConnectivityGraph::new();
    for triead in trieads {
        for link in triead.links() {
            let Some(nexus) = link.nexus.upgrade() else {
                continue;
            };
            if nexus.direction() != direction {
                continue;
            }
            let t = graph.node(NodeKind::Thread(triead.name().to_string()));
            let n = graph.node(NodeKind::Nexus(link.full_name.clone()));
            match (direction, link.role) {
                (Direction::Forward, FacetRole::Reader) | (Direction::Reverse, FacetRole::Writer) => {
                    graph.add_edge(t, n)
                }
                (Direction::Forward, FacetRole::Writer) | (Direction::Reverse, FacetRole::Reader) => {
                    graph.add_edge(n, t)
                }
            }
        }
    }
    graph
}

/// Check both nexus directions for loops
pub fn check_loops(app: &str, trieads: &[Arc<Triead>]) -> Result<()> {
    for direction in [Direction::Forward, Direction::Reverse] {
        let mut graph = build_graph(trieads, direction);
        if let Some(description) = graph.check() {
            return Err(TriesteError::TopologyCycle {
                app: app.to_string(),
                direction: direction.name(),
                description,
            });
        }
    }
    Ok(())
}
