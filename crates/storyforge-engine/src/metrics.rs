use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use storyforge_core::traits::MetricsSink;
use storyforge_core::types::{NodeExecution, RunId, RunOutcome};

/// JSONL metrics log.
///
/// Each run gets `{log_dir}/{run_id}.jsonl`; every segment of the run
/// (start, then one per resume) appends to it, so a crash never loses
/// lines already written.
pub struct JsonlMetricsSink {
    log_dir: PathBuf,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LogEntry<'a> {
    RunStarted {
        timestamp: String,
        run_id: &'a str,
    },
    NodeExecuted(&'a NodeExecution),
    RunEnded {
        timestamp: String,
        run_id: &'a str,
        outcome: RunOutcome,
    },
}

impl JsonlMetricsSink {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    fn append(&self, run_id: &RunId, entry: &LogEntry<'_>) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize metrics entry");
                return;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
            error!(error = %e, dir = %self.log_dir.display(), "Failed to create metrics directory");
            return;
        }
        let path = self.log_path(run_id);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = written {
            error!(error = %e, path = %path.display(), "Failed to write metrics entry");
        }
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn record_node_execution(&self, execution: &NodeExecution) {
        self.append(&execution.run_id, &LogEntry::NodeExecuted(execution));
    }

    fn start_run(&self, run_id: &RunId) {
        self.append(
            run_id,
            &LogEntry::RunStarted {
                timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.as_str(),
            },
        );
    }

    fn end_run(&self, run_id: &RunId, outcome: RunOutcome) {
        self.append(
            run_id,
            &LogEntry::RunEnded {
                timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.as_str(),
                outcome,
            },
        );
    }
}

/// Emits node executions as `tracing` events.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_node_execution(&self, e: &NodeExecution) {
        info!(
            run_id = %e.run_id,
            node = %e.node,
            tool = %e.tool,
            duration_secs = e.duration_secs,
            tokens = e.tokens,
            cost = e.cost,
            failed = e.error.is_some(),
            "Node executed"
        );
    }

    fn end_run(&self, run_id: &RunId, outcome: RunOutcome) {
        info!(run_id = %run_id, %outcome, "Run segment ended");
    }
}

/// Aggregates for one tool label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub calls: u64,
    pub errors: u64,
    pub total_secs: f64,
    pub tokens: u64,
    pub cost: f64,
}

/// Totals across every run a [`SummaryMetrics`] has seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub tools: BTreeMap<String, ToolStats>,
    pub completed: u64,
    pub suspended: u64,
    pub failed: u64,
}

impl MetricsSummary {
    pub fn total_tokens(&self) -> u64 {
        self.tools.values().map(|t| t.tokens).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.tools.values().map(|t| t.cost).sum()
    }
}

/// In-memory aggregating sink.
#[derive(Default)]
pub struct SummaryMetrics {
    summary: Mutex<MetricsSummary>,
}

impl SummaryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSummary {
        self.summary.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl MetricsSink for SummaryMetrics {
    fn record_node_execution(&self, e: &NodeExecution) {
        let Ok(mut summary) = self.summary.lock() else {
            return;
        };
        let stats = summary.tools.entry(e.tool.clone()).or_default();
        stats.calls += 1;
        stats.total_secs += e.duration_secs;
        stats.tokens += e.tokens.unwrap_or(0);
        stats.cost += e.cost.unwrap_or(0.0);
        if e.error.is_some() {
            stats.errors += 1;
        }
    }

    fn end_run(&self, _run_id: &RunId, outcome: RunOutcome) {
        let Ok(mut summary) = self.summary.lock() else {
            return;
        };
        match outcome {
            RunOutcome::Completed => summary.completed += 1,
            RunOutcome::Suspended => summary.suspended += 1,
            RunOutcome::Failed => summary.failed += 1,
        }
    }
}

/// Forwards every event to each inner sink in order.
pub struct FanoutMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetricsSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricsSink for FanoutMetricsSink {
    fn record_node_execution(&self, execution: &NodeExecution) {
        for sink in &self.sinks {
            sink.record_node_execution(execution);
        }
    }

    fn start_run(&self, run_id: &RunId) {
        for sink in &self.sinks {
            sink.start_run(run_id);
        }
    }

    fn end_run(&self, run_id: &RunId, outcome: RunOutcome) {
        for sink in &self.sinks {
            sink.end_run(run_id, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(run_id: &RunId, tool: &str, error: Option<&str>) -> NodeExecution {
        NodeExecution {
            run_id: run_id.clone(),
            node: tool.to_string(),
            tool: tool.to_string(),
            duration_secs: 0.5,
            tokens: Some(120),
            cost: Some(0.01),
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_jsonl_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlMetricsSink::new(dir.path().join("metrics"));
        let run_id = RunId::new();

        sink.start_run(&run_id);
        sink.record_node_execution(&execution(&run_id, "story_generator", None));
        sink.end_run(&run_id, RunOutcome::Suspended);
        // A resumed segment appends to the same file.
        sink.start_run(&run_id);
        sink.end_run(&run_id, RunOutcome::Completed);

        let content = std::fs::read_to_string(sink.log_path(&run_id)).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["event"], "run_started");
        assert_eq!(lines[1]["event"], "node_executed");
        assert_eq!(lines[1]["tool"], "story_generator");
        assert_eq!(lines[2]["outcome"], "suspended");
        assert_eq!(lines[4]["outcome"], "completed");
    }

    #[test]
    fn test_summary_aggregates_by_tool() {
        let sink = SummaryMetrics::new();
        let run_id = RunId::new();
        sink.record_node_execution(&execution(&run_id, "critic", None));
        sink.record_node_execution(&execution(&run_id, "critic", Some("timeout")));
        sink.record_node_execution(&execution(&run_id, "style", None));
        sink.end_run(&run_id, RunOutcome::Failed);

        let summary = sink.snapshot();
        let critic = &summary.tools["critic"];
        assert_eq!(critic.calls, 2);
        assert_eq!(critic.errors, 1);
        assert_eq!(critic.tokens, 240);
        assert_eq!(summary.total_tokens(), 360);
        assert!((summary.total_cost() - 0.03).abs() < 1e-9);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(SummaryMetrics::new());
        let b = Arc::new(SummaryMetrics::new());
        let sinks: Vec<Arc<dyn MetricsSink>> = vec![a.clone(), b.clone()];
        let fanout = FanoutMetricsSink::new(sinks);
        let run_id = RunId::new();

        fanout.record_node_execution(&execution(&run_id, "draft", None));
        fanout.end_run(&run_id, RunOutcome::Completed);

        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.snapshot().completed, 1);
    }
}
