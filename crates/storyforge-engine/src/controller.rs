use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::MetricsSink;
use storyforge_core::types::{NodeExecution, RunId, RunOutcome};

use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::graph::executor::{check_owned_keys, Cursor, Segment, SegmentEnd};
use crate::graph::{RunResult, StoryState, WorkflowGraph};

/// Drives runs of one workflow with durable suspension.
///
/// A run moves Running → Suspended → Resuming → (Suspended | terminal).
/// Suspended runs live in the checkpoint store; terminal runs leave nothing
/// behind.
pub struct RunController {
    graph: Arc<WorkflowGraph>,
    store: Arc<dyn CheckpointStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl RunController {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        store: Arc<dyn CheckpointStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            graph,
            store,
            metrics,
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Start a new run from the entry node.
    pub async fn start_run(&self, initial: StoryState) -> Result<RunResult> {
        self.start_run_with_id(RunId::new(), initial).await
    }

    /// Start a run under a caller-chosen id. Fails if that id has a checkpoint.
    pub async fn start_run_with_id(&self, run_id: RunId, initial: StoryState) -> Result<RunResult> {
        if self.store.load(&run_id)?.is_some() {
            return Err(StoryforgeError::Checkpoint(format!(
                "run {} already has a checkpoint",
                run_id
            )));
        }

        info!(run_id = %run_id, workflow = %self.graph.name(), "Starting run");
        self.metrics.start_run(&run_id);

        let mut executions = Vec::new();
        let segment = self
            .graph
            .traverse(
                &run_id,
                initial,
                Cursor::Execute(self.graph.entry().to_string()),
                Vec::new(),
                &mut executions,
            )
            .await;
        self.finish(run_id, segment, executions)
    }

    /// Resume a suspended run with external input.
    ///
    /// Unknown or already-claimed runs are rejected without touching the store.
    /// Input the pending node rejects leaves the checkpoint suspended.
    pub async fn resume_run(&self, run_id: &RunId, input: StoryState) -> Result<RunResult> {
        let existing = self
            .store
            .load(run_id)?
            .ok_or_else(|| StoryforgeError::resume_rejected(run_id, "no suspended run with this id"))?;
        if existing.workflow != self.graph.name() {
            return Err(StoryforgeError::resume_rejected(
                run_id,
                format!("run belongs to workflow '{}'", existing.workflow),
            ));
        }
        if existing.status != CheckpointStatus::Suspended {
            return Err(StoryforgeError::resume_rejected(run_id, "not currently suspended"));
        }

        let checkpoint = self
            .store
            .claim(run_id)?
            .ok_or_else(|| StoryforgeError::resume_rejected(run_id, "not currently suspended"))?;

        let update = match self.resume_update(&checkpoint, input) {
            Ok(update) => update,
            Err(e) => {
                warn!(run_id = %run_id, node = %checkpoint.pending_node, error = %e, "Resume input rejected");
                self.store.release(run_id)?;
                return Err(match e {
                    e if e.is_config() => e,
                    StoryforgeError::ResumeRejected { reason, .. } => {
                        StoryforgeError::resume_rejected(run_id, reason)
                    }
                    other => StoryforgeError::resume_rejected(run_id, other.to_string()),
                });
            }
        };

        info!(run_id = %run_id, node = %checkpoint.pending_node, "Resuming run");
        self.metrics.start_run(run_id);

        let mut state = checkpoint.state;
        state.merge(update);

        let mut executions = Vec::new();
        let segment = self
            .graph
            .traverse(
                run_id,
                state,
                Cursor::RouteFrom(checkpoint.pending_node),
                checkpoint.visited,
                &mut executions,
            )
            .await;
        let result = self.finish(run_id.clone(), segment, executions);
        if result.is_err() {
            // The claim must not outlive a failed segment or a failed save.
            if let Err(e) = self.store.release(run_id) {
                warn!(run_id = %run_id, error = %e, "Failed to release claimed checkpoint");
            }
        }
        result
    }

    fn resume_update(&self, checkpoint: &Checkpoint, input: StoryState) -> Result<StoryState> {
        let spec = self.graph.node(&checkpoint.pending_node).ok_or_else(|| {
            StoryforgeError::Config(format!(
                "pending node '{}' not found in workflow '{}'",
                checkpoint.pending_node,
                self.graph.name()
            ))
        })?;
        let update = spec.node.resume(&checkpoint.state, input)?;
        check_owned_keys(spec, &update)?;
        Ok(update)
    }

    /// Delete a suspended run.
    ///
    /// A run stuck in `Resuming` (its process died mid-resume) can also be
    /// abandoned; nothing else can move it out of that state.
    pub fn abandon_run(&self, run_id: &RunId) -> Result<()> {
        let checkpoint = self
            .store
            .load(run_id)?
            .ok_or_else(|| StoryforgeError::resume_rejected(run_id, "no suspended run with this id"))?;
        if checkpoint.status == CheckpointStatus::Resuming {
            warn!(run_id = %run_id, node = %checkpoint.pending_node, "Abandoning run with an unfinished resume");
        }
        self.store.delete(run_id)?;
        info!(run_id = %run_id, "Run abandoned");
        Ok(())
    }

    /// Suspended runs of this workflow, oldest first.
    pub fn pending_runs(&self) -> Result<Vec<Checkpoint>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|cp| cp.workflow == self.graph.name())
            .collect())
    }

    pub fn pending_run(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        Ok(self
            .store
            .load(run_id)?
            .filter(|cp| cp.workflow == self.graph.name()))
    }

    fn finish(
        &self,
        run_id: RunId,
        segment: Result<Segment>,
        executions: Vec<NodeExecution>,
    ) -> Result<RunResult> {
        for execution in &executions {
            self.metrics.record_node_execution(execution);
        }

        let segment = match segment {
            Ok(s) => s,
            Err(e) => {
                self.metrics.end_run(&run_id, RunOutcome::Failed);
                return Err(e);
            }
        };

        let outcome = match &segment.end {
            SegmentEnd::Suspended { node, payload } => {
                self.store.save(&Checkpoint {
                    run_id: run_id.clone(),
                    workflow: self.graph.name().to_string(),
                    pending_node: node.clone(),
                    state: segment.state.clone(),
                    payload: payload.clone(),
                    visited: segment.visited.clone(),
                    status: CheckpointStatus::Suspended,
                    created_at: Utc::now(),
                })?;
                RunOutcome::Suspended
            }
            SegmentEnd::Completed => {
                self.store.delete(&run_id)?;
                RunOutcome::Completed
            }
            SegmentEnd::Failed { node } => {
                warn!(run_id = %run_id, node = %node, "Run terminated with error");
                self.store.delete(&run_id)?;
                RunOutcome::Failed
            }
        };

        self.metrics.end_run(&run_id, outcome);
        info!(run_id = %run_id, %outcome, steps = segment.visited.len(), "Run segment finished");
        Ok(segment.into_result(run_id))
    }
}
