//! 生成模型服务

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::providers::retry::{RetryPolicy, retry_with_backoff};

/// prompt → text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Ollama 生成模型客户端
pub struct OllamaLanguageModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaLanguageModel {
    pub fn new(base_url: &str, model_name: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model_name: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": 0.0 }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Ollama generate failed ({}): {}", status, error_text);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AppError::Provider(message)
            } else {
                AppError::Validation(message)
            });
        }

        let body: OllamaGenerateResponse = response.json().await?;
        Ok(body.response)
    }
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        retry_with_backoff(&self.retry, "ollama.generate", || self.generate_once(prompt)).await
    }
}

pub fn create_language_model(
    config: &ProviderConfig,
    retry: RetryPolicy,
) -> Result<Box<dyn LanguageModel>> {
    let model = OllamaLanguageModel::new(
        &config.ollama_url,
        &config.llm_model,
        Duration::from_secs(config.timeout_secs),
        retry,
    )?;
    Ok(Box::new(model))
}

/// 去掉 LLM 输出中的 markdown 代码围栏
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[tokio::test]
    async fn test_ollama_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": "qwen", "stream": false })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": "hi" })),
            )
            .mount(&server)
            .await;

        let model = OllamaLanguageModel::new(
            &server.uri(),
            "qwen",
            Duration::from_secs(5),
            RetryPolicy::immediate(1),
        )
        .unwrap();
        assert_eq!(model.complete("hello").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_ollama_generate_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let model = OllamaLanguageModel::new(
            &server.uri(),
            "qwen",
            Duration::from_secs(5),
            RetryPolicy::immediate(2),
        )
        .unwrap();

        let err = model.complete("hello").await.unwrap_err();
        assert!(err.is_transient());
    }
}
