use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Text-completion service used by compute nodes.
pub trait ModelService: Send + Sync + 'static {
    /// Send a system + user prompt pair and return the completion text.
    fn invoke<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str)
        -> BoxFuture<'a, Result<String>>;

    /// Model identifier, for metrics.
    fn model_id(&self) -> &str {
        "unknown"
    }

    /// Token pricing, if known.
    fn pricing(&self) -> Option<Pricing> {
        None
    }
}

/// External fact lookup used by the research phase.
pub trait ResearchService: Send + Sync + 'static {
    fn search<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<ResearchAnswer>>;
}

/// Metrics side channel.
///
/// Implementations must never panic or propagate errors into the caller;
/// failures are logged and dropped.
pub trait MetricsSink: Send + Sync + 'static {
    /// Record one node execution.
    fn record_node_execution(&self, execution: &NodeExecution);

    /// Called when a run (or a resumed segment of one) begins.
    fn start_run(&self, run_id: &RunId) {
        let _ = run_id;
    }

    /// Called when a run segment ends, after all its node executions were recorded.
    fn end_run(&self, run_id: &RunId, outcome: RunOutcome) {
        let _ = (run_id, outcome);
    }
}

/// Sink that discards everything.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record_node_execution(&self, _execution: &NodeExecution) {}
}
