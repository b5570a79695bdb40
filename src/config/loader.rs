use crate::config::config::AppConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::PathBuf;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHRONOKG_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 优先级（后者覆盖前者）：
    /// 1. 内置默认值
    /// 2. ./chronokg.toml
    /// 3. CHRONOKG_ 前缀环境变量（嵌套键以 `__` 分隔，如 CHRONOKG_DSA__ENABLED）
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let atom = &config.atom;
        for (name, value) in [
            ("atom.ent_threshold", atom.ent_threshold),
            ("atom.rel_threshold", atom.rel_threshold),
            ("atom.entity_name_weight", atom.entity_name_weight),
            ("atom.entity_label_weight", atom.entity_label_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::OutOfRange(name.to_string(), value));
            }
        }

        let weight_sum = atom.entity_name_weight + atom.entity_label_weight;
        if (weight_sum - 1.0).abs() > 1e-3 {
            return Err(ConfigValidationError::WeightSum(weight_sum));
        }

        if atom.max_workers == 0 {
            return Err(ConfigValidationError::InvalidWorkers);
        }

        if config.retry.max_attempts == 0 || config.store.write_attempts == 0 {
            return Err(ConfigValidationError::InvalidAttempts);
        }

        let retry = &config.retry;
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(ConfigValidationError::InvalidMultiplier(retry.multiplier));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigValidationError::InvalidJitter(retry.jitter));
        }

        if config.dsa.compaction_enabled && config.dsa.compaction_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidCompactionInterval);
        }

        if config.provider.dimension == 0 {
            return Err(ConfigValidationError::InvalidDimension);
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("{0} 超出范围 [0, 1]: {1}")]
    OutOfRange(String, f32),

    #[error("实体相似度权重之和必须为 1，当前为 {0}")]
    WeightSum(f32),

    #[error("worker 数量必须大于 0")]
    InvalidWorkers,

    #[error("重试次数必须大于 0")]
    InvalidAttempts,

    #[error("退避倍数必须是不小于 1 的有限数: {0}")]
    InvalidMultiplier(f64),

    #[error("抖动比例超出范围 [0, 1]: {0}")]
    InvalidJitter(f64),

    #[error("后台压缩周期必须大于 0 秒")]
    InvalidCompactionInterval,

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("chronokg.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}
