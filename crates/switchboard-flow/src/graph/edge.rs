use std::sync::Arc;

use tracing::warn;

use switchboard_core::types::Outcome;

use super::node::NodeId;
use crate::session::SessionContext;

/// Branching function of a dynamic edge.
///
/// Must be a pure function of the outcome and the session snapshot it is
/// given. It is called exactly once per visit and never memoized.
pub type EdgeFn = Arc<dyn Fn(&Outcome, &SessionContext) -> Option<NodeId> + Send + Sync>;

/// An edge leaving a node.
#[derive(Clone)]
pub enum Edge {
    /// Always go to this node.
    Static(NodeId),
    /// Let the function pick one of the declared targets.
    Dynamic { targets: Vec<NodeId>, f: EdgeFn },
}

impl Edge {
    pub fn dynamic<F>(targets: Vec<NodeId>, f: F) -> Self
    where
        F: Fn(&Outcome, &SessionContext) -> Option<NodeId> + Send + Sync + 'static,
    {
        Self::Dynamic {
            targets,
            f: Arc::new(f),
        }
    }

    /// Every node this edge can lead to.
    pub fn targets(&self) -> &[NodeId] {
        match self {
            Self::Static(id) => std::slice::from_ref(id),
            Self::Dynamic { targets, .. } => targets,
        }
    }

    /// Evaluate the edge for one visit.
    ///
    /// Returns `None` when a dynamic function yields nothing or picks a node
    /// outside its declared targets.
    pub fn resolve(&self, outcome: &Outcome, ctx: &SessionContext) -> Option<NodeId> {
        match self {
            Self::Static(id) => Some(*id),
            Self::Dynamic { targets, f } => {
                let chosen = f(outcome, ctx)?;
                if targets.contains(&chosen) {
                    Some(chosen)
                } else {
                    warn!(
                        call_id = %ctx.call_id(),
                        node = %chosen,
                        "Dynamic edge chose an undeclared target"
                    );
                    None
                }
            }
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(id) => f.debug_tuple("Static").field(id).finish(),
            Self::Dynamic { targets, .. } => {
                f.debug_struct("Dynamic").field("targets", targets).finish()
            }
        }
    }
}
