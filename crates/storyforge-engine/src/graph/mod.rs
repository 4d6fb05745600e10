//! Workflow graph: named nodes over a shared state record, joined by
//! fixed or router-driven edges.
//!
//! A run starts at the entry node. After each node its partial output is
//! merged into the state and the node's single outgoing edge picks the
//! successor, until the `END` marker is reached or an interruptible node
//! suspends the run.

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{Edge, EdgeTarget, FieldRouter, Router, END};
pub use executor::{CompletedRun, GraphBuilder, RunResult, SuspendedRun, WorkflowGraph};
pub use node::{node_fn, FnNode, Node, NodeContext, NodeOutcome, NodeSpec, Usage};
pub use state::{StoryState, ERROR_KEY};
