use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use storyforge_core::error::Result;
use storyforge_core::traits::ModelService;
use storyforge_core::types::RunId;
use storyforge_llm::estimate_tokens;

use super::state::StoryState;

/// What a node produced for one execution.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// Partial state to merge before routing onward.
    Continue(StoryState),
    /// Pause the run here and hand `payload` to the outside world.
    Suspend(Value),
}

impl NodeOutcome {
    /// Shorthand for a node that writes nothing.
    pub fn unchanged() -> Self {
        Self::Continue(StoryState::new())
    }
}

/// A unit of work in a workflow.
///
/// Nodes read the full state and return a partial update (or a suspension).
/// They never mutate shared state directly.
pub trait Node: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>>;

    /// Turn the external input of a resume into the partial state merged
    /// before routing past this node. Rejecting the input leaves the run suspended.
    fn resume(&self, _state: &StoryState, input: StoryState) -> Result<StoryState> {
        Ok(input)
    }

    /// Keys this node may write. `None` means unrestricted.
    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        None
    }
}

/// A registered node: its name, the tool label reported to metrics, and
/// whether it may suspend the run.
#[derive(Clone)]
pub struct NodeSpec {
    pub name: String,
    pub tool: String,
    pub interruptible: bool,
    pub node: Arc<dyn Node>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("tool", &self.tool)
            .field("interruptible", &self.interruptible)
            .finish()
    }
}

/// Model usage accumulated during one node execution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-execution context handed to a node.
pub struct NodeContext {
    run_id: RunId,
    node: String,
    usage: Mutex<Usage>,
}

impl NodeContext {
    pub fn new(run_id: RunId, node: impl Into<String>) -> Self {
        Self {
            run_id,
            node: node.into(),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Invoke a model and meter the call against this execution.
    pub async fn invoke(
        &self,
        model: &dyn ModelService,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let input_tokens = estimate_tokens(system_prompt) + estimate_tokens(user_prompt);
        let text = model.invoke(system_prompt, user_prompt).await?;
        let output_tokens = estimate_tokens(&text);

        if let Ok(mut usage) = self.usage.lock() {
            usage.calls += 1;
            usage.input_tokens += input_tokens;
            usage.output_tokens += output_tokens;
            if let Some(pricing) = model.pricing() {
                let cost = pricing.cost(input_tokens, output_tokens);
                usage.cost = Some(usage.cost.unwrap_or(0.0) + cost);
            }
        }
        Ok(text)
    }

    /// Usage so far.
    pub fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

/// A node backed by a synchronous closure.
pub struct FnNode<F> {
    f: F,
}

/// Wrap a closure over the current state as a node.
pub fn node_fn<F>(f: F) -> FnNode<F>
where
    F: Fn(&StoryState) -> Result<NodeOutcome> + Send + Sync + 'static,
{
    FnNode { f }
}

impl<F> Node for FnNode<F>
where
    F: Fn(&StoryState) -> Result<NodeOutcome> + Send + Sync + 'static,
{
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        let outcome = (self.f)(state);
        Box::pin(async move { outcome })
    }
}
