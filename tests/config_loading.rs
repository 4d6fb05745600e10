use std::io::Write;

use storyforge_core::config::{AppConfig, CheckpointBackend, DEFAULT_MAX_REVISIONS};

fn load(toml_content: &str) -> AppConfig {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    AppConfig::load(tmp.path()).expect("load config")
}

#[test]
fn test_load_full_config_from_file() {
    let config = load(
        r#"
workspace = "/tmp/storyforge-test"

[model]
provider = "openai"
model_id = "gpt-4.1-mini"
api_key = "sk-test-key"
max_tokens = 8000
temperature = 0.4

[model.retry]
max_retries = 5
initial_backoff_ms = 250

[model.pricing]
input_per_1k = 0.0004
output_per_1k = 0.0016

[[model.fallbacks]]
provider = "ollama"
model_id = "llama3"
base_url = "http://localhost:11434/v1"

[reasoning_model]
model_id = "o4-mini"
api_key = "sk-test-key"

[research]
api_key = "pplx-test"

[workflow]
story_max_revisions = 2
fable_max_revisions = 4
research_question_limit = 3

[checkpoint]
backend = "memory"

[metrics]
enabled = false
log_dir = "/tmp/storyforge-metrics"
"#,
    );

    assert_eq!(config.model.model_id, "gpt-4.1-mini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 8000);

    let retry = config.model.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 250);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.model.fallbacks.len(), 1);
    assert_eq!(config.model.fallbacks[0].model_id, "llama3");
    assert!(config.reasoning_model().fallbacks.is_empty());

    let pricing = config.model.pricing.as_ref().expect("pricing present");
    assert!((pricing.cost(1000, 1000) - 0.002).abs() < 1e-9);

    assert_eq!(config.reasoning_model().model_id, "o4-mini");
    let research = config.research.as_ref().expect("research present");
    assert_eq!(research.base_url, "https://api.perplexity.ai");
    assert_eq!(research.model_id, "sonar");

    assert_eq!(config.workflow.story_max_revisions, 2);
    assert_eq!(config.workflow.fable_max_revisions, 4);
    assert_eq!(config.workflow.research_question_limit, 3);
    assert_eq!(config.checkpoint.backend, CheckpointBackend::Memory);
    assert!(!config.metrics.enabled);
    assert_eq!(
        config.metrics_dir(),
        std::path::PathBuf::from("/tmp/storyforge-metrics")
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("STORYFORGE_TEST_API_KEY", "expanded-key-value");

    let config = load(
        r#"
[model]
model_id = "test-model"
api_key = "${STORYFORGE_TEST_API_KEY}"
"#,
    );
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("STORYFORGE_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = load(
        r#"
workspace = "/tmp/storyforge-defaults"

[model]
model_id = "llama3.2"
"#,
    );

    assert_eq!(config.model.provider, "openai");
    assert!(config.model.retry.is_none());
    assert!(config.reasoning_model.is_none());
    assert_eq!(config.reasoning_model().model_id, "llama3.2");
    assert!(config.research.is_none());
    assert_eq!(config.workflow.story_max_revisions, DEFAULT_MAX_REVISIONS);
    assert_eq!(config.workflow.fable_max_revisions, 3);
    assert_eq!(config.workflow.research_question_limit, 6);
    assert_eq!(config.checkpoint.backend, CheckpointBackend::Sqlite);
    assert_eq!(
        config.checkpoint_path(),
        std::path::PathBuf::from("/tmp/storyforge-defaults/checkpoints.db")
    );
    assert!(config.metrics.enabled);
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/storyforge.toml")).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_invalid_backend_rejected() {
    let err = AppConfig::parse("[model]\nmodel_id = \"m\"\n\n[checkpoint]\nbackend = \"redis\"\n")
        .unwrap_err();
    assert!(err.is_config());
}
