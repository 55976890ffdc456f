//! Read-only index over a flow definition used during traversal.

use std::collections::{HashMap, HashSet};

use action_primitives::FlowNode;

use crate::definition::{FlowDefinition, FlowEdge};

pub const HANDLE_LOOP: &str = "loop";
pub const HANDLE_AFTER: &str = "after";

/// Successors of an array-loop node, split by role.
#[derive(Debug, Default)]
pub struct LoopEdges<'a> {
    /// `loop`-handle targets plus unhandled targets
    pub body: Vec<&'a FlowNode>,
    /// `after`-handle targets, run once when the loop finishes
    pub after: Vec<&'a FlowNode>,
}

/// Node lookup and edge resolution for one flow. Borrowing the definition keeps it shareable
/// across concurrent runs.
#[derive(Debug)]
pub struct FlowGraph<'a> {
    nodes: &'a [FlowNode],
    by_id: HashMap<&'a str, &'a FlowNode>,
    outgoing: HashMap<&'a str, Vec<&'a FlowEdge>>,
    targets: HashSet<&'a str>,
}

impl<'a> FlowGraph<'a> {
    pub fn new(flow: &'a FlowDefinition) -> Self {
        let mut by_id = HashMap::with_capacity(flow.nodes.len());
        for node in &flow.nodes {
            by_id.entry(node.id.as_str()).or_insert(node);
        }
        let mut outgoing: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        let mut targets = HashSet::new();
        for edge in &flow.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
            targets.insert(edge.target.as_str());
        }
        Self {
            nodes: &flow.nodes,
            by_id,
            outgoing,
            targets,
        }
    }

    pub fn node(&self, id: &str) -> Option<&'a FlowNode> {
        self.by_id.get(id).copied()
    }

    /// The start node, else the first node (in source order) that no edge points at.
    pub fn entry(&self) -> Option<&'a FlowNode> {
        self.nodes
            .iter()
            .find(|node| node.is_start())
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|node| !self.targets.contains(node.id.as_str()))
            })
    }

    pub fn outgoing(&self, node_id: &str) -> &[&'a FlowEdge] {
        self.outgoing
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Successor nodes in edge order.
    ///
    /// With a handle, edges carrying that handle win; when none do, unhandled edges are used.
    /// Without a handle every outgoing edge fires. Edges to missing nodes are skipped.
    pub fn successors(&self, node_id: &str, handle: Option<&str>) -> Vec<&'a FlowNode> {
        let edges = self.outgoing(node_id);
        let selected: Vec<&FlowEdge> = match handle {
            Some(handle) => {
                let matching: Vec<_> = edges
                    .iter()
                    .copied()
                    .filter(|e| e.handle() == Some(handle))
                    .collect();
                if matching.is_empty() {
                    edges.iter().copied().filter(|e| e.handle().is_none()).collect()
                } else {
                    matching
                }
            }
            None => edges.to_vec(),
        };
        selected
            .into_iter()
            .filter_map(|edge| self.node(&edge.target))
            .collect()
    }

    pub fn loop_edges(&self, node_id: &str) -> LoopEdges<'a> {
        let mut split = LoopEdges::default();
        for edge in self.outgoing(node_id) {
            let Some(target) = self.node(&edge.target) else {
                continue;
            };
            match edge.handle() {
                Some(HANDLE_AFTER) => split.after.push(target),
                Some(HANDLE_LOOP) | None => split.body.push(target),
                Some(_) => {}
            }
        }
        split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn node(id: &str, action: &str) -> FlowNode {
        FlowNode::new(id, action, Value::Null)
    }

    fn def(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> FlowDefinition {
        FlowDefinition {
            nodes,
            edges,
            ..Default::default()
        }
    }

    #[test]
    fn entry_prefers_start_then_first_root() {
        let with_start = def(
            vec![node("a", "click"), node("s", "start")],
            vec![FlowEdge::new("s", "a")],
        );
        assert_eq!(FlowGraph::new(&with_start).entry().unwrap().id, "s");

        let rootless = def(
            vec![node("b", "click"), node("x", "click"), node("y", "click")],
            vec![FlowEdge::new("b", "x")],
        );
        assert_eq!(FlowGraph::new(&rootless).entry().unwrap().id, "b");

        let cyclic = def(
            vec![node("p", "click"), node("q", "click")],
            vec![FlowEdge::new("p", "q"), FlowEdge::new("q", "p")],
        );
        assert!(FlowGraph::new(&cyclic).entry().is_none());
    }

    #[test]
    fn handle_selection_falls_back_to_unhandled_edges() {
        let flow = def(
            vec![node("c", "condition"), node("t", "click"), node("plain", "click")],
            vec![
                FlowEdge::new("c", "t").with_handle("true"),
                FlowEdge::new("c", "plain"),
                FlowEdge::new("c", "missing").with_handle("false"),
            ],
        );
        let graph = FlowGraph::new(&flow);
        let ids = |nodes: Vec<&FlowNode>| nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(graph.successors("c", Some("true"))), vec!["t"]);
        // "false" matches only a dangling edge, which is skipped after selection.
        assert!(graph.successors("c", Some("false")).is_empty());
        assert_eq!(ids(graph.successors("c", Some("other"))), vec!["plain"]);
        assert_eq!(ids(graph.successors("c", None)), vec!["t", "plain"]);
    }

    #[test]
    fn loop_edges_treat_unhandled_as_body() {
        let flow = def(
            vec![
                node("l", "loop"),
                node("body", "click"),
                node("legacy", "click"),
                node("done", "response"),
            ],
            vec![
                FlowEdge::new("l", "body").with_handle("loop"),
                FlowEdge::new("l", "legacy"),
                FlowEdge::new("l", "done").with_handle("after"),
            ],
        );
        let split = FlowGraph::new(&flow).loop_edges("l");
        assert_eq!(split.body.len(), 2);
        assert_eq!(split.after[0].id, "done");
    }
}
