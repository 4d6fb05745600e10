use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};

use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::types::{NodeExecution, RunId};

use super::edge::{Edge, EdgeTarget, Router, END};
use super::node::{Node, NodeContext, NodeOutcome, NodeSpec};
use super::state::{StoryState, ERROR_KEY};

/// Result of driving a run until it completes or suspends.
#[derive(Debug, Clone)]
pub enum RunResult {
    Completed(CompletedRun),
    Suspended(SuspendedRun),
}

/// A run that reached the end marker, or terminated on a node failure
/// (in which case `state.error()` is set).
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: RunId,
    pub state: StoryState,
    pub visited: Vec<String>,
}

/// A run paused inside an interruptible node.
#[derive(Debug, Clone)]
pub struct SuspendedRun {
    pub run_id: RunId,
    pub pending_node: String,
    pub payload: Value,
    pub state: StoryState,
    pub visited: Vec<String>,
}

impl RunResult {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Completed(r) => &r.run_id,
            Self::Suspended(r) => &r.run_id,
        }
    }

    pub fn state(&self) -> &StoryState {
        match self {
            Self::Completed(r) => &r.state,
            Self::Suspended(r) => &r.state,
        }
    }

    /// Node names in execution order, across every segment of the run.
    pub fn visited(&self) -> &[String] {
        match self {
            Self::Completed(r) => &r.visited,
            Self::Suspended(r) => &r.visited,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_completed(self) -> Option<CompletedRun> {
        match self {
            Self::Completed(r) => Some(r),
            Self::Suspended(_) => None,
        }
    }

    pub fn into_suspended(self) -> Option<SuspendedRun> {
        match self {
            Self::Suspended(r) => Some(r),
            Self::Completed(_) => None,
        }
    }
}

/// Where a traversal segment starts.
#[derive(Debug, Clone)]
pub(crate) enum Cursor {
    /// Execute this node first.
    Execute(String),
    /// The named node already ran; follow its outgoing edge.
    RouteFrom(String),
}

/// How a traversal segment ended.
#[derive(Debug, Clone)]
pub(crate) enum SegmentEnd {
    Completed,
    Failed { node: String },
    Suspended { node: String, payload: Value },
}

/// Everything a traversal segment produced.
#[derive(Debug)]
pub(crate) struct Segment {
    pub state: StoryState,
    pub visited: Vec<String>,
    pub end: SegmentEnd,
}

/// Collects nodes and edges, then validates them into a [`WorkflowGraph`].
pub struct GraphBuilder {
    name: String,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
        }
    }

    /// Register a node whose tool label is its own name.
    pub fn node(self, name: &str, node: impl Node) -> Self {
        self.node_with_tool(name, name, node)
    }

    /// Register a node with an explicit tool label for metrics.
    pub fn node_with_tool(mut self, name: &str, tool: &str, node: impl Node) -> Self {
        self.nodes.push(NodeSpec {
            name: name.to_string(),
            tool: tool.to_string(),
            interruptible: false,
            node: Arc::new(node),
        });
        self
    }

    /// Register a node that may suspend the run.
    pub fn interruptible_node(mut self, name: &str, tool: &str, node: impl Node) -> Self {
        self.nodes.push(NodeSpec {
            name: name.to_string(),
            tool: tool.to_string(),
            interruptible: true,
            node: Arc::new(node),
        });
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push(Edge::fixed(from, to));
        self
    }

    pub fn conditional_edges(
        mut self,
        from: &str,
        router: impl Router,
        branches: &[(&str, &str)],
    ) -> Self {
        let branches: BTreeMap<String, String> = branches
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.edges
            .push(Edge::conditional(from, Arc::new(router), branches));
        self
    }

    pub fn entry(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    /// Validate and freeze the graph. Any structural defect is a `Config` error.
    pub fn build(self) -> Result<WorkflowGraph> {
        let config_err = |msg: String| {
            Err(StoryforgeError::Config(format!(
                "workflow '{}': {}",
                self.name, msg
            )))
        };

        let mut nodes: HashMap<String, NodeSpec> = HashMap::new();
        let mut order = Vec::new();
        for spec in &self.nodes {
            if spec.name == END {
                return config_err(format!("'{}' is reserved", END));
            }
            if nodes.insert(spec.name.clone(), spec.clone()).is_some() {
                return config_err(format!("duplicate node '{}'", spec.name));
            }
            order.push(spec.name.clone());
        }

        let entry = match &self.entry {
            Some(e) if nodes.contains_key(e) => e.clone(),
            Some(e) => return config_err(format!("entry '{}' is not a node", e)),
            None => return config_err("no entry node".to_string()),
        };

        let mut edges: HashMap<String, Edge> = HashMap::new();
        for edge in &self.edges {
            if !nodes.contains_key(&edge.from) {
                return config_err(format!("edge from unknown node '{}'", edge.from));
            }
            for target in edge.targets() {
                if target != END && !nodes.contains_key(target) {
                    return config_err(format!(
                        "edge from '{}' to unknown node '{}'",
                        edge.from, target
                    ));
                }
            }
            if let EdgeTarget::Conditional { router, branches } = &edge.target {
                if let Some(outcomes) = router.outcomes() {
                    for key in outcomes {
                        if !branches.contains_key(&key) {
                            return config_err(format!(
                                "router after '{}' can return '{}' which has no branch",
                                edge.from, key
                            ));
                        }
                    }
                }
            }
            if edges.insert(edge.from.clone(), edge.clone()).is_some() {
                return config_err(format!("node '{}' has more than one outgoing edge", edge.from));
            }
        }

        for name in &order {
            if !edges.contains_key(name) {
                return config_err(format!("node '{}' has no outgoing edge", name));
            }
        }

        Ok(WorkflowGraph {
            name: self.name,
            nodes,
            order,
            edges,
            entry,
        })
    }
}

/// A validated, immutable workflow definition.
///
/// Nodes are executed one at a time; after each, the node's single outgoing
/// edge picks the successor. Cycles are allowed: loop bounds live in the
/// routers, never in the executor.
pub struct WorkflowGraph {
    name: String,
    nodes: HashMap<String, NodeSpec>,
    order: Vec<String>,
    edges: HashMap<String, Edge>,
    entry: String,
}

impl WorkflowGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    /// Node names in registration order.
    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    /// Run from the entry node without persistence. A suspension is returned
    /// as-is and cannot be resumed; use a `RunController` for that.
    pub async fn run(&self, initial: StoryState) -> Result<RunResult> {
        let run_id = RunId::new();
        let mut executions = Vec::new();
        let segment = self
            .traverse(
                &run_id,
                initial,
                Cursor::Execute(self.entry.clone()),
                Vec::new(),
                &mut executions,
            )
            .await?;
        Ok(segment.into_result(run_id))
    }

    /// Successor of `from` for the given state.
    pub(crate) fn next_after(&self, from: &str, state: &StoryState) -> Result<String> {
        let edge = self.edges.get(from).ok_or_else(|| {
            StoryforgeError::Config(format!("node '{}' has no outgoing edge", from))
        })?;
        let next = edge.resolve(state)?;
        debug!(from, to = %next, "Routing");
        Ok(next)
    }

    /// Drive the run from `cursor` until it ends or suspends.
    ///
    /// Node failures terminate the run with the `error` field set. Graph
    /// configuration defects are returned as `Err`.
    pub(crate) async fn traverse(
        &self,
        run_id: &RunId,
        mut state: StoryState,
        cursor: Cursor,
        mut visited: Vec<String>,
        executions: &mut Vec<NodeExecution>,
    ) -> Result<Segment> {
        let mut current = match cursor {
            Cursor::Execute(name) => name,
            Cursor::RouteFrom(name) => self.next_after(&name, &state)?,
        };

        while current != END {
            let spec = self.nodes.get(&current).ok_or_else(|| {
                StoryforgeError::Config(format!("node '{}' not found in graph", current))
            })?;
            visited.push(current.clone());

            info!(run_id = %run_id, node = %spec.name, "Executing node");

            let ctx = NodeContext::new(run_id.clone(), &spec.name);
            let started = Instant::now();
            let outcome = spec.node.execute(&state, &ctx).await;
            let usage = ctx.usage();

            executions.push(NodeExecution {
                run_id: run_id.clone(),
                node: spec.name.clone(),
                tool: spec.tool.clone(),
                duration_secs: started.elapsed().as_secs_f64(),
                tokens: (usage.calls > 0).then(|| usage.total_tokens()),
                cost: usage.cost,
                error: outcome.as_ref().err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            });

            match outcome {
                Ok(NodeOutcome::Continue(partial)) => {
                    check_owned_keys(spec, &partial)?;
                    state.merge(partial);
                }
                Ok(NodeOutcome::Suspend(payload)) => {
                    if !spec.interruptible {
                        return Err(StoryforgeError::Config(format!(
                            "node '{}' suspended but is not interruptible",
                            spec.name
                        )));
                    }
                    info!(run_id = %run_id, node = %spec.name, "Run suspended");
                    return Ok(Segment {
                        state,
                        visited,
                        end: SegmentEnd::Suspended {
                            node: spec.name.clone(),
                            payload,
                        },
                    });
                }
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    error!(run_id = %run_id, node = %spec.name, error = %e, "Node failed, terminating run");
                    state.set(ERROR_KEY, format!("{}: {}", spec.name, e));
                    return Ok(Segment {
                        state,
                        visited,
                        end: SegmentEnd::Failed {
                            node: spec.name.clone(),
                        },
                    });
                }
            }

            current = self.next_after(&spec.name, &state)?;
        }

        debug!(run_id = %run_id, steps = visited.len(), "Run reached end");
        Ok(Segment {
            state,
            visited,
            end: SegmentEnd::Completed,
        })
    }

    /// Mermaid flowchart of the graph, for inspection.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        out.push_str(&format!("    __start__ --> {}\n", self.entry));
        for name in &self.order {
            let Some(edge) = self.edges.get(name) else {
                continue;
            };
            match &edge.target {
                EdgeTarget::Fixed(to) => out.push_str(&format!("    {} --> {}\n", name, to)),
                EdgeTarget::Conditional { branches, .. } => {
                    for (key, to) in branches {
                        out.push_str(&format!("    {} -. {} .-> {}\n", name, key, to));
                    }
                }
            }
        }
        out
    }
}

impl Segment {
    pub(crate) fn into_result(self, run_id: RunId) -> RunResult {
        match self.end {
            SegmentEnd::Suspended { node, payload } => RunResult::Suspended(SuspendedRun {
                run_id,
                pending_node: node,
                payload,
                state: self.state,
                visited: self.visited,
            }),
            SegmentEnd::Completed | SegmentEnd::Failed { .. } => {
                RunResult::Completed(CompletedRun {
                    run_id,
                    state: self.state,
                    visited: self.visited,
                })
            }
        }
    }
}

pub(crate) fn check_owned_keys(spec: &NodeSpec, partial: &StoryState) -> Result<()> {
    let Some(allowed) = spec.node.owned_keys() else {
        return Ok(());
    };
    for key in partial.keys() {
        if !allowed.contains(&key) {
            return Err(StoryforgeError::Config(format!(
                "node '{}' wrote undeclared key '{}'",
                spec.name, key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::node_fn;
    use futures::future::BoxFuture;
    use serde_json::json;

    fn write(key: &'static str, value: &'static str) -> impl Node {
        node_fn(move |_| Ok(NodeOutcome::Continue(StoryState::new().with(key, value))))
    }

    #[tokio::test]
    async fn linear_graph_runs_in_order() {
        let graph = GraphBuilder::new("linear")
            .node("a", write("a", "1"))
            .node("b", write("b", "2"))
            .edge("a", "b")
            .edge("b", END)
            .entry("a")
            .build()
            .unwrap();

        let result = graph.run(StoryState::new()).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.visited(), &["a".to_string(), "b".to_string()]);
        assert_eq!(result.state().get_str("a"), "1");
        assert_eq!(result.state().get_str("b"), "2");
    }

    #[tokio::test]
    async fn conditional_loop_bounded_by_router() {
        let graph = GraphBuilder::new("loop")
            .node(
                "count",
                node_fn(|s| {
                    Ok(NodeOutcome::Continue(
                        StoryState::new().with("n", s.get_u64("n") + 1),
                    ))
                }),
            )
            .conditional_edges(
                "count",
                |s: &StoryState| {
                    if s.get_u64("n") < 4 {
                        "again".to_string()
                    } else {
                        "done".to_string()
                    }
                },
                &[("again", "count"), ("done", END)],
            )
            .entry("count")
            .build()
            .unwrap();

        let result = graph.run(StoryState::new()).await.unwrap();
        assert_eq!(result.state().get_u64("n"), 4);
        assert_eq!(result.visited().len(), 4);
    }

    #[tokio::test]
    async fn node_error_terminates_with_error_field() {
        let graph = GraphBuilder::new("failing")
            .node(
                "boom",
                node_fn(|_| Err(StoryforgeError::node("boom", "model unavailable"))),
            )
            .node("after", write("after", "ran"))
            .edge("boom", "after")
            .edge("after", END)
            .entry("boom")
            .build()
            .unwrap();

        let result = graph.run(StoryState::new()).await.unwrap();
        let completed = result.into_completed().unwrap();
        assert!(completed.state.error().unwrap().contains("model unavailable"));
        assert!(!completed.state.contains("after"));
        assert_eq!(completed.visited, vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn suspend_from_plain_node_is_config_error() {
        let graph = GraphBuilder::new("bad")
            .node("pause", node_fn(|_| Ok(NodeOutcome::Suspend(json!({})))))
            .edge("pause", END)
            .entry("pause")
            .build()
            .unwrap();

        assert!(graph.run(StoryState::new()).await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn suspend_from_interruptible_node() {
        let graph = GraphBuilder::new("review")
            .node("prep", write("draft", "text"))
            .interruptible_node(
                "review",
                "review_tool",
                node_fn(|s| Ok(NodeOutcome::Suspend(json!({"draft": s.get_str("draft")})))),
            )
            .edge("prep", "review")
            .edge("review", END)
            .entry("prep")
            .build()
            .unwrap();

        let suspended = graph
            .run(StoryState::new())
            .await
            .unwrap()
            .into_suspended()
            .unwrap();
        assert_eq!(suspended.pending_node, "review");
        assert_eq!(suspended.payload, json!({"draft": "text"}));
    }

    struct Restricted;

    impl Node for Restricted {
        fn execute<'a>(
            &'a self,
            _state: &'a StoryState,
            _ctx: &'a NodeContext,
        ) -> BoxFuture<'a, Result<NodeOutcome>> {
            Box::pin(async {
                Ok(NodeOutcome::Continue(
                    StoryState::new().with("title", "ok").with("story", "sneaky"),
                ))
            })
        }

        fn owned_keys(&self) -> Option<&'static [&'static str]> {
            Some(&["title"])
        }
    }

    #[tokio::test]
    async fn undeclared_write_is_config_error() {
        let graph = GraphBuilder::new("owned")
            .node("restricted", Restricted)
            .edge("restricted", END)
            .entry("restricted")
            .build()
            .unwrap();

        let err = graph.run(StoryState::new()).await.unwrap_err();
        assert!(err.to_string().contains("undeclared key 'story'"));
    }

    #[test]
    fn build_rejects_unknown_target() {
        let err = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .edge("a", "ghost")
            .entry("a")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown node 'ghost'"));
    }

    #[test]
    fn build_rejects_duplicate_node() {
        let err = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .node("a", write("a", "2"))
            .edge("a", END)
            .entry("a")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("duplicate node"));
    }

    #[test]
    fn build_rejects_missing_entry_and_dangling_node() {
        let missing_entry = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .edge("a", END)
            .build();
        assert!(missing_entry.is_err());

        let dangling = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .node("b", write("b", "1"))
            .edge("a", END)
            .entry("a")
            .build();
        assert!(dangling.err().unwrap().to_string().contains("'b' has no outgoing edge"));
    }

    #[test]
    fn build_rejects_second_outgoing_edge() {
        let err = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .edge("a", END)
            .edge("a", "a")
            .entry("a")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("more than one outgoing edge"));
    }

    #[test]
    fn build_rejects_unmapped_router_outcome() {
        let err = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .conditional_edges(
                "a",
                crate::graph::edge::FieldRouter::new("genre", &["Historical"], "Terror"),
                &[("Historical", END)],
            )
            .entry("a")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("'Terror' which has no branch"));
    }

    #[test]
    fn mermaid_lists_every_edge() {
        let graph = GraphBuilder::new("g")
            .node("a", write("a", "1"))
            .node("b", write("b", "1"))
            .conditional_edges(
                "a",
                |_: &StoryState| "x".to_string(),
                &[("x", "b"), ("y", END)],
            )
            .edge("b", END)
            .entry("a")
            .build()
            .unwrap();

        let chart = graph.to_mermaid();
        assert!(chart.contains("__start__ --> a"));
        assert!(chart.contains("a -. x .-> b"));
        assert!(chart.contains("b --> __end__"));
    }
}
