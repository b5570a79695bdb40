//! chronokg - 增量时序知识图谱构建
//!
//! 文本块被分解为原子事实，逐条抽取带时间的五元组，经实体/关系消解并行合并进
//! 分区图谱后批量写入存储。社区摘要以增量（delta）方式累积，读取时与基础摘要合并，
//! 由后台压缩任务定期折叠。

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod providers;
pub mod services;
pub mod storage;
