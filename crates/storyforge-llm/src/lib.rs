pub mod openai;
pub mod research;
pub mod retry;
pub mod tokens;

use std::sync::Arc;

use storyforge_core::config::{ModelConfig, ResearchConfig};
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::{ModelService, ResearchService};

pub use openai::OpenAiClient;
pub use research::PerplexityResearch;
pub use retry::RetryingClient;
pub use tokens::estimate_tokens;

/// Create a model client for the configured provider.
///
/// The client is wrapped in retry when `retry` is set or fallbacks are
/// listed. Fallback models are tried once each, in order.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn ModelService>> {
    let client = create_client(config)?;
    if config.retry.is_none() && config.fallbacks.is_empty() {
        return Ok(client);
    }

    let fallbacks = config
        .fallbacks
        .iter()
        .map(create_client)
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(RetryingClient::new(
        client,
        fallbacks,
        config.retry.clone().unwrap_or_default(),
    )))
}

fn create_client(config: &ModelConfig) -> Result<Arc<dyn ModelService>> {
    match config.provider.as_str() {
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" | "together" => {
            Ok(Arc::new(OpenAiClient::new(config.clone())))
        }
        other => Err(StoryforgeError::UnsupportedProvider(other.to_string())),
    }
}

/// Create the research client.
pub fn create_research(config: &ResearchConfig) -> Arc<dyn ResearchService> {
    Arc::new(PerplexityResearch::new(config.clone()))
}
