//! 配置管理模块
//!
//! 提供显式配置结构与加载逻辑，支持 TOML 配置文件和环境变量覆盖。
//! 配置在构造时传入各组件，不存在进程级全局设置。

pub mod config;
pub mod loader;

pub use config::{
    AppConfig, AtomConfig, DsaConfig, LoggingConfig, ProviderConfig, RelationKeyMode,
    RetryConfig, StoreConfig,
};
pub use loader::{ConfigLoader, ConfigValidationError};
