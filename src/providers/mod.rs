//! 外部能力接口
//!
//! 嵌入（text → vector）与生成（prompt → text）两类 provider，以及共用的重试策略。

pub mod embedding;
pub mod llm;
pub mod retry;

pub use embedding::{EmbeddingModel, OllamaEmbeddingModel, SimpleEmbeddingModel, create_embedding_model};
pub use llm::{LanguageModel, OllamaLanguageModel, create_language_model};
pub use retry::{RetryPolicy, retry_with_backoff};
