use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use storyforge_core::config::RetryConfig;
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::ModelService;
use storyforge_core::types::Pricing;

/// A model client that retries failed requests and falls back to alternative models.
pub struct RetryingClient {
    primary: Arc<dyn ModelService>,
    fallbacks: Vec<Arc<dyn ModelService>>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Arc<dyn ModelService>,
        fallbacks: Vec<Arc<dyn ModelService>>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &StoryforgeError) -> bool {
    match e {
        StoryforgeError::ModelRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelService for RetryingClient {
    fn invoke<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.invoke(system_prompt, user_prompt).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying model request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for fallback in &self.fallbacks {
                match fallback.invoke(system_prompt, user_prompt).await {
                    Ok(text) => {
                        info!(model = %fallback.model_id(), "Fell back to alternative model");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(model = %fallback.model_id(), error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| StoryforgeError::ModelRequest("All providers failed".into())))
        })
    }

    fn model_id(&self) -> &str {
        self.primary.model_id()
    }

    fn pricing(&self) -> Option<Pricing> {
        self.primary.pricing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyforge_test_utils::MockModel;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&StoryforgeError::ModelRequest("HTTP 503: busy".into())));
        assert!(is_retryable(&StoryforgeError::ModelRequest("connection reset".into())));
        assert!(!is_retryable(&StoryforgeError::ModelRequest("HTTP 401".into())));
        assert!(!is_retryable(&StoryforgeError::ModelResponse("bad json".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 2000,
        };
        let d = calculate_backoff(4, &config);
        assert!(d <= Duration::from_millis(2400));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let primary = Arc::new(MockModel::failing_then("HTTP 503", 2, "recovered"));
        let client = RetryingClient::new(primary.clone(), vec![], fast_retry(3));

        let text = client.invoke("sys", "user").await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(primary.call_count(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let primary = Arc::new(MockModel::failing_then("HTTP 401", 1, "never"));
        let client = RetryingClient::new(primary.clone(), vec![], fast_retry(3));

        assert!(client.invoke("sys", "user").await.is_err());
        assert_eq!(primary.call_count(), 1);
    }

    #[tokio::test]
    async fn falls_back_when_primary_exhausted() {
        let primary = Arc::new(MockModel::failing_then("HTTP 500", 10, "never"));
        let fallback: Arc<dyn ModelService> = Arc::new(MockModel::constant("from fallback"));
        let client = RetryingClient::new(primary.clone(), vec![fallback], fast_retry(1));

        let text = client.invoke("sys", "user").await.unwrap();
        assert_eq!(text, "from fallback");
        assert_eq!(primary.call_count(), 2);
    }
}
