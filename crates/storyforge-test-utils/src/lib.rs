//! Shared mocks and fixtures for StoryForge tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::{MetricsSink, ModelService, ResearchService};
use storyforge_core::types::{NodeExecution, ResearchAnswer, RunId, RunOutcome};

type Responder = Box<dyn Fn(&str, &str, usize) -> Result<String> + Send + Sync>;

/// Model mock driven by a closure over `(system_prompt, user_prompt, call_index)`.
pub struct MockModel {
    responder: Responder,
    calls: Mutex<Vec<(String, String)>>,
    count: AtomicUsize,
}

impl MockModel {
    pub fn new(
        responder: impl Fn(&str, &str, usize) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Always answer with the same text.
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _, _| Ok(text.clone()))
    }

    /// Fail `failures` times with a `ModelRequest` error, then answer `text`.
    pub fn failing_then(error: &str, failures: usize, text: &str) -> Self {
        let error = error.to_string();
        let text = text.to_string();
        Self::new(move |_, _, i| {
            if i < failures {
                Err(StoryforgeError::ModelRequest(error.clone()))
            } else {
                Ok(text.clone())
            }
        })
    }

    /// Answer by the first rule whose key appears in the system prompt.
    pub fn routed(rules: Vec<(&str, &str)>, default: &str) -> Self {
        let rules: Vec<(String, String)> = rules
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let default = default.to_string();
        Self::new(move |system, _, _| {
            Ok(rules
                .iter()
                .find(|(key, _)| system.contains(key.as_str()))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| default.clone()))
        })
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// All `(system, user)` prompt pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ModelService for MockModel {
    fn invoke<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let index = self.count.fetch_add(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            (self.responder)(system_prompt, user_prompt, index)
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// Research mock: answers every question, failing those that contain "FAIL".
#[derive(Default)]
pub struct MockResearch {
    questions: Mutex<Vec<String>>,
}

impl MockResearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl ResearchService for MockResearch {
    fn search<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<ResearchAnswer>> {
        Box::pin(async move {
            self.questions.lock().unwrap().push(question.to_string());
            if question.contains("FAIL") {
                return Err(StoryforgeError::Research("search backend unavailable".into()));
            }
            Ok(ResearchAnswer {
                answer: format!("Answer to: {}", question),
                citations: vec!["https://archive.example/entry".to_string()],
            })
        })
    }
}

/// Metrics sink that records everything it receives.
#[derive(Default)]
pub struct RecordingMetrics {
    executions: Mutex<Vec<NodeExecution>>,
    runs: Mutex<Vec<(RunId, Option<RunOutcome>)>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executions(&self) -> Vec<NodeExecution> {
        self.executions.lock().unwrap().clone()
    }

    /// `(run_id, None)` on start, `(run_id, Some(outcome))` on end.
    pub fn run_events(&self) -> Vec<(RunId, Option<RunOutcome>)> {
        self.runs.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_node_execution(&self, execution: &NodeExecution) {
        self.executions.lock().unwrap().push(execution.clone());
    }

    fn start_run(&self, run_id: &RunId) {
        self.runs.lock().unwrap().push((run_id.clone(), None));
    }

    fn end_run(&self, run_id: &RunId, outcome: RunOutcome) {
        self.runs.lock().unwrap().push((run_id.clone(), Some(outcome)));
    }
}

/// A fresh temporary directory that lives as long as the returned guard.
pub fn temp_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().to_path_buf();
    (dir, path)
}

/// Minimal parsed config for tests.
pub fn test_config_toml() -> &'static str {
    r#"
workspace = "/tmp/storyforge-test"

[model]
provider = "openai"
model_id = "gpt-4.1-mini"
api_key = "sk-test"

[workflow]
story_max_revisions = 3
fable_max_revisions = 3
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routed_model_matches_system_prompt() {
        let model = MockModel::routed(vec![("critic", "{\"approved\": true}")], "plain");
        assert_eq!(
            model.invoke("You are a critic", "x").await.unwrap(),
            "{\"approved\": true}"
        );
        assert_eq!(model.invoke("You are a writer", "x").await.unwrap(), "plain");
        assert_eq!(model.call_count(), 2);
    }

    #[test]
    fn test_config_parses() {
        let parsed: toml::Value = toml::from_str(test_config_toml()).unwrap();
        assert_eq!(parsed["model"]["model_id"].as_str(), Some("gpt-4.1-mini"));
    }
}
