//! Call-flow graph: an arena of control-action nodes.
//!
//! A flow is a directed graph of `ActionNode`s addressed by `NodeId`. Each
//! non-terminal node carries exactly one next edge and optionally an error
//! edge. An edge is either a static reference or a pure function of the
//! node's `Outcome` and the session snapshot that picks among a declared set
//! of targets.
//!
//! Graphs are assembled bottom-up with `FlowBuilder`. Forward references use
//! reserved slots that must be defined before `build()`, which also verifies
//! that every node can reach a terminal node.

pub mod builder;
pub mod edge;
pub mod node;

pub use builder::{FlowBuilder, Graph};
pub use edge::{Edge, EdgeFn};
pub use node::{Action, ActionKind, ActionNode, NodeId, PromptSource, TextSource};
