//! 错误处理模块
//!
//! 定义 chronokg 的错误类型。错误按来源分类，以便调用方区分
//! 可重试的外部故障（provider、store）与需要跳过的单元故障（extraction）。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// 抽取错误：LLM 输出无法解析
    #[error("抽取失败: {0}")]
    Extraction(String),

    /// 完整性错误：关系引用了不存在的实体
    #[error("完整性错误: {0}")]
    Integrity(String),

    /// 外部 provider（embedding / LLM）错误
    #[error("provider 错误: {0}")]
    Provider(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    Store(String),

    /// 并发写冲突（CAS 失败）
    #[error("写冲突: {0}")]
    Conflict(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 参数验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 嵌入模型错误
    #[error("嵌入模型错误: {0}")]
    Embedding(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// 是否为瞬时故障（值得退避重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Provider(_)
                | AppError::Timeout(_)
                | AppError::Store(_)
                | AppError::Conflict(_)
                | AppError::Embedding(_)
        )
    }

    /// 错误代码，用于报告聚合
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Extraction(_) => "EXTRACTION",
            AppError::Integrity(_) => "INTEGRITY",
            AppError::Provider(_) => "PROVIDER",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Store(_) => "STORE",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "BAD_REQUEST",
            AppError::Config(_) => "CONFIG",
            AppError::Serialization(_) => "SERIALIZATION",
            AppError::Embedding(_) => "EMBEDDING_ERROR",
            AppError::Internal(_) | AppError::Io(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Provider(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout(e.to_string())
    }
}

/// 报告中的单条失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// 失败单元 ID（fact id、community id 等）
    pub unit_id: String,
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
}

impl FailureRecord {
    pub fn new(unit_id: impl Into<String>, err: &AppError) -> Self {
        Self {
            unit_id: unit_id.into(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Provider("503".into()).is_transient());
        assert!(AppError::Timeout("slow".into()).is_transient());
        assert!(AppError::Store("down".into()).is_transient());
        assert!(!AppError::Extraction("bad json".into()).is_transient());
        assert!(!AppError::Validation("bad".into()).is_transient());
    }

    #[test]
    fn test_failure_record() {
        let record = FailureRecord::new("fact-1", &AppError::Extraction("no tuples".into()));
        assert_eq!(record.unit_id, "fact-1");
        assert_eq!(record.code, "EXTRACTION");
        assert!(record.message.contains("no tuples"));
    }
}
