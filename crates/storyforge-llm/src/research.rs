use futures::future::BoxFuture;
use reqwest::Client;

use storyforge_core::config::ResearchConfig;
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::ResearchService;
use storyforge_core::types::ResearchAnswer;

use crate::openai::{chat_endpoint, send_chat, ChatRequest, OaiMessage};

const RESEARCH_SYSTEM_PROMPT: &str =
    "You are a helpful research assistant. Provide detailed, factual answers with historical accuracy.";

/// Online research through a Perplexity-style chat endpoint that returns citations.
pub struct PerplexityResearch {
    http: Client,
    config: ResearchConfig,
}

impl PerplexityResearch {
    pub fn new(config: ResearchConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

impl ResearchService for PerplexityResearch {
    fn search<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<ResearchAnswer>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.config.model_id,
                messages: vec![
                    OaiMessage {
                        role: "system",
                        content: RESEARCH_SYSTEM_PROMPT,
                    },
                    OaiMessage {
                        role: "user",
                        content: question,
                    },
                ],
                max_tokens: None,
                temperature: Some(0.1),
            };

            let response = send_chat(
                &self.http,
                &chat_endpoint(&self.config.base_url),
                Some(&self.config.api_key),
                &request,
            )
            .await
            .map_err(|e| StoryforgeError::Research(e.to_string()))?;

            let (answer, citations) = response
                .into_text()
                .map_err(|e| StoryforgeError::Research(e.to_string()))?;
            Ok(ResearchAnswer { answer, citations })
        })
    }
}
