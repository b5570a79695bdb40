//! 嵌入模型服务

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::providers::retry::{RetryPolicy, retry_with_backoff};

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// 离线嵌入模型
///
/// 将字符三元组哈希到固定维度后做 L2 归一化，结果只依赖输入文本。
/// 可用 `add_embedding` 为特定文本预置向量。
pub struct SimpleEmbeddingModel {
    embeddings: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl SimpleEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            embeddings: HashMap::new(),
            dimension: dimension.max(1),
        }
    }

    pub fn add_embedding(&mut self, text: &str, embedding: &[f32]) {
        if embedding.len() == self.dimension {
            self.embeddings.insert(text.to_string(), embedding.to_vec());
        }
    }

    pub fn with_embedding(mut self, text: &str, embedding: &[f32]) -> Self {
        self.add_embedding(text, embedding);
        self
    }

    fn hash_trigrams(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized: Vec<char> = format!("  {}  ", text.to_lowercase()).chars().collect();

        for window in normalized.windows(3) {
            let mut hash: u64 = 0xcbf29ce484222325;
            for c in window {
                for byte in c.to_string().bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingModel for SimpleEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(embedding) = self.embeddings.get(text) {
            return Ok(embedding.clone());
        }
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }
        Ok(self.hash_trigrams(text))
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            let embedding = self.encode(text).await?;
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Ollama Embedding 模型客户端
pub struct OllamaEmbeddingModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    dimension: usize,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingModel {
    pub fn new(
        base_url: &str,
        model_name: &str,
        dimension: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model_name: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
            retry,
        })
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "input": texts,
                "truncate": true
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Ollama embedding failed ({}): {}", status, error_text);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AppError::Embedding(message)
            } else {
                AppError::Validation(message)
            });
        }

        let embed_response: OllamaEmbedResponse = response.json().await?;
        if embed_response.embeddings.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embed_response.embeddings.len()
            )));
        }
        Ok(embed_response.embeddings)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        retry_with_backoff(&self.retry, "ollama.embed", || self.embed_once(texts)).await
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed(&[text.to_string()]).await?;
        Ok(embeddings
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.dimension]))
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = 32;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let embeddings = self.embed(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn create_embedding_model(
    config: &ProviderConfig,
    retry: RetryPolicy,
) -> Result<Box<dyn EmbeddingModel>> {
    match config.backend.as_str() {
        "ollama" => {
            let model = OllamaEmbeddingModel::new(
                &config.ollama_url,
                &config.embedding_model,
                config.dimension,
                Duration::from_secs(config.timeout_secs),
                retry,
            )?;
            Ok(Box::new(model))
        }
        "simple" => Ok(Box::new(SimpleEmbeddingModel::new(config.dimension))),
        other => Err(AppError::Config(format!("unknown provider backend: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::resolution::similarity::cosine_similarity;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_simple_embedding_model() {
        let model = SimpleEmbeddingModel::new(384);
        let model: Box<dyn EmbeddingModel> = Box::new(model);

        let result = model.encode("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
        assert_eq!(model.dimension(), 384);
        assert_eq!(result, model.encode("hello world").await.unwrap());
    }

    #[tokio::test]
    async fn test_simple_embedding_similar_names_are_close() {
        let model = SimpleEmbeddingModel::new(256);
        let a = model.encode("Acme Corporation").await.unwrap();
        let b = model.encode("Acme Corp").await.unwrap();
        let c = model.encode("Zebra").await.unwrap();

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_preset_embedding_overrides_hashing() {
        let model = SimpleEmbeddingModel::new(2).with_embedding("Alice", &[1.0, 0.0]);
        assert_eq!(model.encode("Alice").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_batch_encoding() {
        let model = SimpleEmbeddingModel::new(384);
        let texts = vec!["hello".to_string(), "world".to_string(), "test".to_string()];
        let results = model.encode_batch(&texts).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.len() == 384));
    }

    #[tokio::test]
    async fn test_ollama_embedding_retries_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embeddings": [[0.5, 0.5]] })),
            )
            .mount(&server)
            .await;

        let model = OllamaEmbeddingModel::new(
            &server.uri(),
            "nomic-embed-text",
            2,
            Duration::from_secs(5),
            RetryPolicy::immediate(3),
        )
        .unwrap();

        assert_eq!(model.encode("Alice").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_ollama_embedding_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let model = OllamaEmbeddingModel::new(
            &server.uri(),
            "missing",
            2,
            Duration::from_secs(5),
            RetryPolicy::immediate(3),
        )
        .unwrap();

        let err = model.encode("Alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = ProviderConfig {
            backend: "nope".into(),
            ..ProviderConfig::default()
        };
        assert!(create_embedding_model(&config, RetryPolicy::default()).is_err());
    }
}
