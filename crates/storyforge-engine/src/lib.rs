pub mod checkpoint;
pub mod controller;
pub mod governor;
pub mod graph;
pub mod metrics;

use std::sync::Arc;

use storyforge_core::config::{AppConfig, CheckpointBackend};
use storyforge_core::error::Result;
use storyforge_core::traits::MetricsSink;

pub use checkpoint::{
    Checkpoint, CheckpointStatus, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
pub use controller::RunController;
pub use governor::{ApprovalMarker, GovernorDecision, RevisionGovernor, FORCED_APPROVAL_KEY};
pub use graph::{
    node_fn, CompletedRun, GraphBuilder, Node, NodeContext, NodeOutcome, Router, RunResult,
    StoryState, SuspendedRun, WorkflowGraph, END,
};
pub use metrics::{
    FanoutMetricsSink, JsonlMetricsSink, MetricsSummary, SummaryMetrics, TracingMetricsSink,
};

/// Open the checkpoint store selected in config.
pub fn open_checkpoint_store(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>> {
    Ok(match config.checkpoint.backend {
        CheckpointBackend::Sqlite => Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path())?),
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
    })
}

/// Metrics sinks selected in config: tracing always, JSONL when enabled,
/// plus the given summary sink.
pub fn metrics_sink(config: &AppConfig, summary: Arc<SummaryMetrics>) -> Arc<dyn MetricsSink> {
    let mut sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(TracingMetricsSink), summary];
    if config.metrics.enabled {
        sinks.push(Arc::new(JsonlMetricsSink::new(config.metrics_dir())));
    }
    Arc::new(FanoutMetricsSink::new(sinks))
}
