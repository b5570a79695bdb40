use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 关系去重键的形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationKeyMode {
    /// (source, target, type, source_chunk_id)：保留来源，默认
    #[default]
    Provenance,
    /// (source, target, type)：跨 chunk 折叠同类关系
    Endpoints,
}

/// ATOM 抽取与合并配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomConfig {
    /// 实体合并阈值
    pub ent_threshold: f32,
    /// 关系合并阈值
    pub rel_threshold: f32,
    /// 并行 worker 上限
    pub max_workers: usize,
    /// 实体名称嵌入权重
    pub entity_name_weight: f32,
    /// 实体标签匹配权重
    pub entity_label_weight: f32,
    /// 单个 fact 抽取超时（秒）
    pub extraction_timeout_secs: u64,
    /// 单个 chunk 的 token 上限
    pub max_chunk_tokens: usize,
    /// 关系去重键
    pub relation_key: RelationKeyMode,
}

impl Default for AtomConfig {
    fn default() -> Self {
        Self {
            ent_threshold: 0.8,
            rel_threshold: 0.7,
            max_workers: 8,
            entity_name_weight: 0.8,
            entity_label_weight: 0.2,
            extraction_timeout_secs: 60,
            max_chunk_tokens: 400,
            relation_key: RelationKeyMode::Provenance,
        }
    }
}

/// Delta-Summary Accumulation 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DsaConfig {
    /// 关闭时每次更新都回退为全量重新摘要
    pub enabled: bool,
    /// pending delta 数量阈值（严格大于时触发压缩）
    pub delta_count_threshold: usize,
    /// pending delta 累计 token 阈值（严格大于时触发压缩）
    pub delta_token_threshold: u32,
    /// 是否允许压缩
    pub compaction_enabled: bool,
    /// 后台压缩周期（秒）
    pub compaction_interval_secs: u64,
    /// 已压缩 delta 的保留天数
    pub compacted_retention_days: i64,
}

impl Default for DsaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delta_count_threshold: 5,
            delta_token_threshold: 1000,
            compaction_enabled: true,
            compaction_interval_secs: 300,
            compacted_retention_days: 7,
        }
    }
}

/// 重试配置（provider 调用与批量写入共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次退避（毫秒）
    pub initial_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub multiplier: f64,
    /// 抖动比例
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// 存储写入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 批量写入大小
    pub write_batch_size: usize,
    /// 批量写入尝试次数
    pub write_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_batch_size: 50,
            write_attempts: 3,
        }
    }
}

/// 外部模型 provider 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 后端类型: "ollama" 或 "simple"
    pub backend: String,
    /// Ollama 服务器地址
    pub ollama_url: String,
    /// 嵌入模型名称
    pub embedding_model: String,
    /// 生成模型名称
    pub llm_model: String,
    /// 向量维度
    pub dimension: usize,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: "simple".into(),
            ollama_url: "http://localhost:11434".into(),
            embedding_model: "nomic-embed-text".into(),
            llm_model: "qwen2.5:7b".into(),
            dimension: 384,
            timeout_secs: 60,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化（JSON）日志
    pub structured: bool,
    /// 日志文件目录
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 抽取与合并
    pub atom: AtomConfig,
    /// 社区摘要增量
    pub dsa: DsaConfig,
    /// 重试
    pub retry: RetryConfig,
    /// 存储写入
    pub store: StoreConfig,
    /// 模型 provider
    pub provider: ProviderConfig,
    /// 日志
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            atom: AtomConfig::default(),
            dsa: DsaConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
            provider: ProviderConfig::default(),
            logging: LoggingConfig::default(),
            app_name: "chronokg".into(),
            environment: "development".into(),
        }
    }
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".into();
        config
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::default();
        config.environment = "production".into();
        config.logging.structured = true;
        config.logging.log_dir = Some(PathBuf::from("./logs"));
        config.provider.backend = "ollama".into();
        config.atom.max_workers = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(8);
        config
    }
}
