//! Directed dependency graph over file paths and symbol ids.
//!
//! Nodes are plain string identifiers; edges live in two adjacency maps so
//! both "what does X depend on" and "who depends on X" are single lookups.
//! The graph may contain cycles.
//!
//! # Invariants
//!
//! - Every edge insertion or removal updates both maps together.
//! - No edge references a node absent from the node set.
//!
//! # Serialization
//!
//! The persisted form flattens the graph into a node array and a forward
//! adjacency array; the reverse map is rebuilt on load, so a document on
//! disk can never carry a reverse map that disagrees with the forward one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GraphDocument", into = "GraphDocument")]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// node → nodes it depends on.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// node → nodes that depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        self.nodes.insert(id.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Add `from → to`. Returns `false` (and changes nothing) when either
    /// endpoint is unknown, for self-edges, or when the edge already exists.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if from == to || !self.nodes.contains(from) || !self.nodes.contains(to) {
            return false;
        }
        let inserted = self
            .dependencies
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        if inserted {
            self.dependents
                .entry(to.to_string())
                .or_default()
                .insert(from.to_string());
        }
        inserted
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let removed = remove_from(&mut self.dependencies, from, to);
        if removed {
            remove_from(&mut self.dependents, to, from);
        }
        removed
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> bool {
        if !self.nodes.remove(id) {
            return false;
        }
        if let Some(targets) = self.dependencies.remove(id) {
            for target in targets {
                remove_from(&mut self.dependents, &target, id);
            }
        }
        if let Some(sources) = self.dependents.remove(id) {
            for source in sources {
                remove_from(&mut self.dependencies, &source, id);
            }
        }
        true
    }

    /// Nodes `id` depends on. `None` when `id` is not a node.
    pub fn dependencies(&self, id: &str) -> Option<Vec<&str>> {
        self.neighbours(&self.dependencies, id)
    }

    /// Nodes depending on `id`. `None` when `id` is not a node.
    pub fn dependents(&self, id: &str) -> Option<Vec<&str>> {
        self.neighbours(&self.dependents, id)
    }

    pub fn dependent_count(&self, id: &str) -> usize {
        self.dependents.get(id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|s| s.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges as `(from, to)` in sorted order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.as_str(), to.as_str())))
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(|s| s.len()).sum()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.dependencies.clear();
        self.dependents.clear();
    }

    /// Check that the reverse map mirrors the forward map exactly.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.dependencies.iter().all(|(from, tos)| {
            self.nodes.contains(from)
                && tos.iter().all(|to| {
                    self.nodes.contains(to)
                        && self.dependents.get(to).is_some_and(|s| s.contains(from))
                })
        });
        let reverse_ok = self.dependents.iter().all(|(to, froms)| {
            froms
                .iter()
                .all(|from| self.dependencies.get(from).is_some_and(|s| s.contains(to)))
        });
        forward_ok && reverse_ok
    }

    fn neighbours<'a>(
        &'a self,
        map: &'a BTreeMap<String, BTreeSet<String>>,
        id: &str,
    ) -> Option<Vec<&'a str>> {
        if !self.nodes.contains(id) {
            return None;
        }
        Some(
            map.get(id)
                .map(|set| set.iter().map(|s| s.as_str()).collect())
                .unwrap_or_default(),
        )
    }
}

fn remove_from(map: &mut BTreeMap<String, BTreeSet<String>>, key: &str, value: &str) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

/// Flattened, array-only form of [`DependencyGraph`] used on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<String>,
    edges: Vec<GraphEdges>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphEdges {
    from: String,
    to: Vec<String>,
}

impl From<DependencyGraph> for GraphDocument {
    fn from(graph: DependencyGraph) -> Self {
        Self {
            nodes: graph.nodes.into_iter().collect(),
            edges: graph
                .dependencies
                .into_iter()
                .map(|(from, to)| GraphEdges {
                    from,
                    to: to.into_iter().collect(),
                })
                .collect(),
        }
    }
}

impl From<GraphDocument> for DependencyGraph {
    fn from(doc: GraphDocument) -> Self {
        let mut graph = DependencyGraph::new();
        for node in doc.nodes {
            graph.add_node(node);
        }
        for edges in doc.edges {
            for to in &edges.to {
                graph.add_edge(&edges.from, to);
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(nodes: &[&str]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(*n);
        }
        g
    }

    #[test]
    fn test_edge_updates_both_maps() {
        let mut g = graph_with(&["a", "b"]);
        assert!(g.add_edge("a", "b"));
        assert_eq!(g.dependencies("a").unwrap(), vec!["b"]);
        assert_eq!(g.dependents("b").unwrap(), vec!["a"]);
        assert!(g.is_consistent());
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let mut g = graph_with(&["a"]);
        assert!(!g.add_edge("a", "missing"));
        assert!(!g.add_edge("missing", "a"));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_self_edge_and_duplicate_rejected() {
        let mut g = graph_with(&["a", "b"]);
        assert!(!g.add_edge("a", "a"));
        assert!(g.add_edge("a", "b"));
        assert!(!g.add_edge("a", "b"));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_cycles_allowed() {
        let mut g = graph_with(&["a", "b"]);
        assert!(g.add_edge("a", "b"));
        assert!(g.add_edge("b", "a"));
        assert_eq!(g.edge_count(), 2);
        assert!(g.is_consistent());
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g.add_edge("c", "a");
        assert!(g.remove_node("b"));
        assert_eq!(g.edge_count(), 1);
        assert!(g.dependents("b").is_none());
        assert_eq!(g.dependencies("a").unwrap(), Vec::<&str>::new());
        assert!(g.is_consistent());
    }

    #[test]
    fn test_remove_edge() {
        let mut g = graph_with(&["a", "b"]);
        g.add_edge("a", "b");
        assert!(g.remove_edge("a", "b"));
        assert!(!g.remove_edge("a", "b"));
        assert_eq!(g.dependent_count("b"), 0);
        assert!(g.is_consistent());
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_reverse_map() {
        let mut g = graph_with(&["src/a.ts", "src/b.ts", "src/b.ts:foo:1"]);
        g.add_edge("src/a.ts", "src/b.ts");
        g.add_edge("src/a.ts", "src/b.ts:foo:1");
        let json = serde_json::to_string(&g).unwrap();
        assert!(json.contains("\"nodes\""));
        let restored: DependencyGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, g);
        assert_eq!(restored.dependents("src/b.ts").unwrap(), vec!["src/a.ts"]);
    }
}
