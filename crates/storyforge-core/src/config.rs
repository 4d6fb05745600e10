use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryforgeError};
use crate::types::Pricing;

/// Top-level StoryForge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub model: ModelConfig,
    /// Optional separate model for critique and question generation.
    #[serde(default)]
    pub reasoning_model: Option<ModelConfig>,
    #[serde(default)]
    pub research: Option<ResearchConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    /// Tried in order once the retries against this model run out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<ModelConfig>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
            pricing: None,
            fallbacks: Vec::new(),
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Research provider (Perplexity-style online chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_research_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_research_model")]
    pub model_id: String,
}

impl ResearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: default_research_base_url(),
            api_key: api_key.into(),
            model_id: default_research_model(),
        }
    }
}

fn default_research_base_url() -> String { "https://api.perplexity.ai".to_string() }
fn default_research_model() -> String { "sonar".to_string() }

/// Workflow tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Critic revision cap for the story workflow.
    #[serde(default = "default_max_revisions")]
    pub story_max_revisions: u32,
    /// Human review revision cap for the fable workflow.
    #[serde(default = "default_max_revisions")]
    pub fable_max_revisions: u32,
    /// Maximum number of research questions asked per historical story.
    #[serde(default = "default_research_question_limit")]
    pub research_question_limit: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            story_max_revisions: default_max_revisions(),
            fable_max_revisions: default_max_revisions(),
            research_question_limit: default_research_question_limit(),
        }
    }
}

pub const DEFAULT_MAX_REVISIONS: u32 = 3;

fn default_max_revisions() -> u32 { DEFAULT_MAX_REVISIONS }
fn default_research_question_limit() -> usize { 6 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Checkpoint / resume configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Database path. Default: <workspace>/checkpoints.db
    #[serde(default)]
    pub path: Option<String>,
}

/// JSONL metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Directory for metrics files. Default: <workspace>/metrics
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            log_dir: None,
        }
    }
}

fn default_metrics_enabled() -> bool { true }

fn default_workspace() -> String { "~/.storyforge".to_string() }

impl AppConfig {
    /// Config with default sections around the given main model.
    pub fn new(model: ModelConfig) -> Self {
        Self {
            workspace: default_workspace(),
            model,
            reasoning_model: None,
            research: None,
            workflow: WorkflowConfig::default(),
            checkpoint: CheckpointConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StoryforgeError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| StoryforgeError::Config(e.to_string()))
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.workspace)
    }

    /// Path of the checkpoint database.
    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.checkpoint.path {
            Some(p) => expand_home(p),
            None => self.workspace_dir().join("checkpoints.db"),
        }
    }

    /// Directory for JSONL metrics.
    pub fn metrics_dir(&self) -> PathBuf {
        match &self.metrics.log_dir {
            Some(p) => expand_home(p),
            None => self.workspace_dir().join("metrics"),
        }
    }

    /// The model used for critique and planning, falling back to the main model.
    pub fn reasoning_model(&self) -> &ModelConfig {
        self.reasoning_model.as_ref().unwrap_or(&self.model)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STORYFORGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STORYFORGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_STORYFORGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_STORYFORGE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_STORYFORGE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = AppConfig::parse(
            r#"
[model]
model_id = "gpt-4.1-mini"
"#,
        )
        .unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.workflow.story_max_revisions, 3);
        assert_eq!(config.workflow.fable_max_revisions, 3);
        assert_eq!(config.workflow.research_question_limit, 6);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Sqlite);
        assert!(config.metrics.enabled);
        assert!(config.research.is_none());
        assert_eq!(config.reasoning_model().model_id, "gpt-4.1-mini");
    }

    #[test]
    fn test_checkpoint_path_override() {
        let config = AppConfig::parse(
            r#"
workspace = "/tmp/sf"

[model]
model_id = "m"

[checkpoint]
backend = "memory"
"#,
        )
        .unwrap();
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Memory);
        assert_eq!(config.checkpoint_path(), PathBuf::from("/tmp/sf/checkpoints.db"));
        assert_eq!(config.metrics_dir(), PathBuf::from("/tmp/sf/metrics"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::parse("[model").unwrap_err();
        assert!(err.is_config());
    }
}
