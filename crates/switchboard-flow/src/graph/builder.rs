use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use switchboard_core::error::{Result, SwitchboardError};

use super::edge::Edge;
use super::node::{ActionNode, NodeId};

/// Arena builder for a call flow.
///
/// Nodes are added bottom-up (terminal nodes first). A node that must point
/// at something not yet built reserves a slot with `reserve()` and fills it
/// later with `define()`.
#[derive(Debug, Default)]
pub struct FlowBuilder {
    slots: Vec<Option<ActionNode>>,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully wired node.
    pub fn add(&mut self, node: ActionNode) -> NodeId {
        self.slots.push(Some(node));
        NodeId(self.slots.len() - 1)
    }

    /// Reserve a slot for a forward reference.
    pub fn reserve(&mut self) -> NodeId {
        self.slots.push(None);
        NodeId(self.slots.len() - 1)
    }

    /// Fill a reserved slot.
    pub fn define(&mut self, id: NodeId, node: ActionNode) -> Result<()> {
        let slot = self.slots.get_mut(id.0).ok_or_else(|| {
            SwitchboardError::GraphConfiguration(format!(
                "slot {} was not reserved by this builder",
                id
            ))
        })?;
        if slot.is_some() {
            return Err(SwitchboardError::GraphConfiguration(format!(
                "slot {} is already defined",
                id
            )));
        }
        *slot = Some(node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Validate the wiring and freeze the graph.
    pub fn build(self, initial: NodeId, default_error: NodeId) -> Result<Graph> {
        let mut nodes = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(node) => nodes.push(node),
                None => return Err(SwitchboardError::UnfilledSlot(i)),
            }
        }

        let graph = Graph {
            nodes,
            initial,
            default_error,
        };
        graph.validate()?;
        Ok(graph)
    }
}

/// A validated, immutable call-flow graph.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<ActionNode>,
    initial: NodeId,
    default_error: NodeId,
}

impl Graph {
    pub fn initial(&self) -> NodeId {
        self.initial
    }

    pub fn default_error(&self) -> NodeId {
        self.default_error
    }

    pub fn node(&self, id: NodeId) -> Option<&ActionNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ActionNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Every node the given node can hand control to, error path included.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return vec![];
        };
        if node.is_terminal() {
            return vec![];
        }
        let mut out: Vec<NodeId> = node
            .next_edge()
            .map(|e| e.targets().to_vec())
            .unwrap_or_default();
        match node.error_edge() {
            Some(edge) => out.extend_from_slice(edge.targets()),
            None if id != self.default_error => out.push(self.default_error),
            None => {}
        }
        out
    }

    /// Nodes reachable from the initial node.
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.initial]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            queue.extend(self.successors(id));
        }
        seen
    }

    fn validate(&self) -> Result<()> {
        for id in [self.initial, self.default_error] {
            if !self.contains(id) {
                return Err(SwitchboardError::GraphConfiguration(format!(
                    "entry node {} is outside the graph",
                    id
                )));
            }
        }

        for (id, node) in self.iter() {
            if node.is_terminal() {
                if node.next_edge().is_some() || node.error_edge().is_some() {
                    return Err(SwitchboardError::GraphConfiguration(format!(
                        "terminal node {} '{}' must not have edges",
                        id, node.description
                    )));
                }
                continue;
            }

            let Some(next) = node.next_edge() else {
                return Err(SwitchboardError::GraphConfiguration(format!(
                    "node {} '{}' has no next edge",
                    id, node.description
                )));
            };

            for edge in std::iter::once(next).chain(node.error_edge()) {
                if edge.targets().is_empty() {
                    return Err(SwitchboardError::GraphConfiguration(format!(
                        "node {} '{}' has a dynamic edge with no declared targets",
                        id, node.description
                    )));
                }
                for target in edge.targets() {
                    if !self.contains(*target) {
                        return Err(SwitchboardError::DanglingReference {
                            node: id.0,
                            target: target.0,
                        });
                    }
                }
            }
        }

        self.check_closure()?;

        let reachable = self.reachable();
        for (id, node) in self.iter() {
            if !reachable.contains(&id) && id != self.default_error {
                warn!(node = %id, description = %node.description, "Node is unreachable from the initial node");
            }
        }

        debug!(nodes = self.nodes.len(), reachable = reachable.len(), "Flow graph validated");
        Ok(())
    }

    /// Verify that every node can reach a terminal node.
    ///
    /// Static edges must lead somewhere that terminates; a dynamic edge needs
    /// at least one declared target that terminates, since which branch is
    /// taken depends on live inputs. Both the next and error paths must hold.
    /// The default error node's own failure goes to the last-resort hangup,
    /// so its error path is not followed.
    fn check_closure(&self) -> Result<()> {
        let n = self.nodes.len();
        let mut terminates = vec![false; n];

        let edge_ok = |edge: &Edge, terminates: &[bool]| match edge {
            Edge::Static(t) => terminates[t.0],
            Edge::Dynamic { targets, .. } => {
                targets.iter().any(|t| terminates[t.0])
            }
        };

        loop {
            let mut changed = false;
            for (id, node) in self.iter() {
                if terminates[id.0] {
                    continue;
                }
                let ok = if node.is_terminal() {
                    true
                } else {
                    let next_ok = node
                        .next_edge()
                        .map(|e| edge_ok(e, &terminates))
                        .unwrap_or(false);
                    let error_ok = match node.error_edge() {
                        Some(e) => edge_ok(e, &terminates),
                        None if id == self.default_error => true,
                        None => terminates[self.default_error.0],
                    };
                    next_ok && error_ok
                };
                if ok {
                    terminates[id.0] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        match terminates.iter().position(|t| !t) {
            Some(i) => Err(SwitchboardError::GraphConfiguration(format!(
                "node {} '{}' cannot reach a terminal node",
                NodeId(i),
                self.nodes[i].description
            ))),
            None => Ok(()),
        }
    }
}
