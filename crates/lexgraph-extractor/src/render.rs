//! Relation graph drawing
//!
//! Builds a `petgraph` digraph keyed by bare entity names and renders it as
//! Graphviz DOT. Parallel edges between the same pair of entities are kept.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use lexgraph_core::{EntityType, RelationRecord};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

const PERSON_COLOR: &str = "#DBEBC2";
const INSTITUTION_COLOR: &str = "#F7A7A6";

/// Degree above which both ends of an edge count as hubs
const HUB_DEGREE: usize = 3;

/// A node in the relation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Tag-stripped entity name
    pub name: String,
    /// Label from the first record mentioning the entity
    pub entity_type: String,
}

impl GraphNode {
    fn color(&self) -> Option<&'static str> {
        let kind = EntityType::from_label(&self.entity_type);
        if kind.is_person_like() {
            Some(PERSON_COLOR)
        } else if matches!(kind, EntityType::Org | EntityType::Court) {
            Some(INSTITUTION_COLOR)
        } else {
            None
        }
    }
}

/// An edge in the relation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub relation: String,
    pub description: String,
}

/// Counts describing a relation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
    /// Number of edges per relation name
    pub relation_counts: BTreeMap<String, usize>,
    /// Highest-degree entity, if any
    pub hub: Option<(String, usize)>,
}

/// In-memory relation graph built from relation records
pub struct RelationGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    node_index: HashMap<String, NodeIndex>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
        }
    }

    /// Build a graph from records, in record order
    pub fn from_records(records: &[RelationRecord]) -> Self {
        let mut graph = Self::new();
        for record in records {
            graph.add_record(record);
        }
        graph
    }

    fn node(&mut self, name: &str, entity_type: &str) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            name: name.to_string(),
            entity_type: entity_type.to_uppercase(),
        });
        self.node_index.insert(name.to_string(), idx);
        idx
    }

    /// Add one record as an edge, creating its endpoints on first sight
    pub fn add_record(&mut self, record: &RelationRecord) {
        let source = self.node(record.entity1.name(), &record.entity1.entity_type);
        let target = self.node(record.entity2.name(), &record.entity2.entity_type);
        self.graph.add_edge(
            source,
            target,
            GraphEdge {
                relation: record.relation.clone(),
                description: record.additional_info.description.clone(),
            },
        );
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Outgoing).count()
            + self.graph.edges_directed(idx, Direction::Incoming).count()
    }

    /// Total in + out degree of each entity, in first-seen order
    pub fn node_degrees(&self) -> Vec<(String, usize)> {
        self.graph
            .node_indices()
            .map(|idx| (self.graph[idx].name.clone(), self.degree(idx)))
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let mut relation_counts = BTreeMap::new();
        for edge in self.graph.edge_weights() {
            *relation_counts.entry(edge.relation.clone()).or_insert(0) += 1;
        }

        // First-seen entity wins ties
        let hub = self
            .node_degrees()
            .into_iter()
            .fold(None, |best: Option<(String, usize)>, (name, degree)| match best {
                Some((_, top)) if top >= degree => best,
                _ => Some((name, degree)),
            });

        GraphSummary {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            relation_counts,
            hub,
        }
    }

    /// Render as a Graphviz DOT digraph
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n    node [shape=circle, style=filled];\n");

        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let width = (6 + self.degree(idx)) as f64 / 10.0;
            let _ = write!(
                dot,
                "    \"{}\" [tooltip=\"{}\", width={width:.1}",
                escape(&node.name),
                escape(&node.entity_type)
            );
            if let Some(color) = node.color() {
                let _ = write!(dot, ", fillcolor=\"{color}\"");
            }
            dot.push_str("];\n");
        }

        for edge in self.graph.edge_indices() {
            let Some((source, target)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let weight = &self.graph[edge];
            let _ = write!(
                dot,
                "    \"{}\" -> \"{}\" [label=\"{}\", tooltip=\"{}\"",
                escape(&self.graph[source].name),
                escape(&self.graph[target].name),
                escape(&weight.relation),
                escape(&weight.description)
            );
            if self.degree(source) > HUB_DEGREE && self.degree(target) > HUB_DEGREE {
                dot.push_str(", len=3");
            }
            dot.push_str("];\n");
        }

        dot.push_str("}\n");
        dot
    }
}

impl Default for RelationGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Draw relation records as a DOT digraph
pub fn draw_relation_graph(records: &[RelationRecord]) -> String {
    RelationGraph::from_records(records).to_dot()
}

/// Degree of every entity mentioned in `records`
pub fn node_degrees(records: &[RelationRecord]) -> Vec<(String, usize)> {
    RelationGraph::from_records(records).node_degrees()
}

pub fn summarize(records: &[RelationRecord]) -> GraphSummary {
    RelationGraph::from_records(records).summary()
}
