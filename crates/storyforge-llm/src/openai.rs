use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use storyforge_core::config::ModelConfig;
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::ModelService;
use storyforge_core::types::Pricing;

pub(crate) const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        chat_endpoint(self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL))
    }
}

/// Build the chat completions URL from a base URL.
pub(crate) fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

// Request types
#[derive(Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OaiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Serialize)]
pub(crate) struct OaiMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    pub(crate) fn into_text(self) -> Result<(String, Vec<String>)> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| StoryforgeError::ModelResponse("response had no choices".into()))?;
        Ok((text, self.citations))
    }
}

/// POST a chat request and decode the response.
pub(crate) async fn send_chat(
    http: &Client,
    url: &str,
    api_key: Option<&str>,
    request: &ChatRequest<'_>,
) -> Result<ChatResponse> {
    let mut builder = http.post(url).json(request);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| StoryforgeError::ModelRequest(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoryforgeError::ModelRequest(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body
        )));
    }

    resp.json::<ChatResponse>()
        .await
        .map_err(|e| StoryforgeError::ModelResponse(e.to_string()))
}

impl ModelService for OpenAiClient {
    fn invoke<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.config.model_id,
                messages: vec![
                    OaiMessage {
                        role: "system",
                        content: system_prompt,
                    },
                    OaiMessage {
                        role: "user",
                        content: user_prompt,
                    },
                ],
                max_tokens: Some(self.config.max_tokens),
                temperature: Some(self.config.temperature),
            };

            debug!(model = %self.config.model_id, "Sending chat request");
            let response = send_chat(
                &self.http,
                &self.endpoint(),
                self.config.api_key.as_deref(),
                &request,
            )
            .await?;
            let (text, _) = response.into_text()?;
            Ok(text)
        })
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn pricing(&self) -> Option<Pricing> {
        self.config.pricing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_endpoint() {
        assert_eq!(
            chat_endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("https://x.test/chat/completions"),
            "https://x.test/chat/completions"
        );
    }

    #[test]
    fn test_request_serialization() {
        let req = ChatRequest {
            model: "gpt-4.1-mini",
            messages: vec![OaiMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: None,
            temperature: Some(0.2),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4.1-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Once upon a time"}}],"citations":["https://a.test"]}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        let (text, citations) = resp.into_text().unwrap();
        assert_eq!(text, "Once upon a time");
        assert_eq!(citations, vec!["https://a.test"]);
    }

    #[test]
    fn test_empty_choices_is_error() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            resp.into_text(),
            Err(StoryforgeError::ModelResponse(_))
        ));
    }
}
