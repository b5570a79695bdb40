//! 可观测性模块
//!
//! 提供流水线指标（Prometheus 文本格式）与结构化日志初始化。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};

// ===== Pipeline Metrics =====

/// 流水线指标
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub facts_extracted: Arc<AtomicU64>,
    pub facts_skipped: Arc<AtomicU64>,
    pub relations_filtered: Arc<AtomicU64>,
    pub provider_failures: Arc<AtomicU64>,
    pub store_write_failures: Arc<AtomicU64>,
    pub deltas_written: Arc<AtomicU64>,
    pub compactions_total: Arc<AtomicU64>,
    pub compactions_deferred: Arc<AtomicU64>,
    pub orphans_collected: Arc<AtomicU64>,
}

impl PipelineMetrics {
    /// 记录抽取结果
    pub fn record_extraction(&self, extracted: usize, skipped: usize) {
        self.facts_extracted
            .fetch_add(extracted as u64, Ordering::SeqCst);
        self.facts_skipped.fetch_add(skipped as u64, Ordering::SeqCst);
    }

    /// 记录被过滤的关系
    pub fn record_filtered(&self, count: usize) {
        self.relations_filtered
            .fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_provider_failures(&self, count: usize) {
        self.provider_failures
            .fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn record_store_failure(&self) {
        self.store_write_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_delta(&self) {
        self.deltas_written.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_compaction(&self) {
        self.compactions_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_compaction_deferred(&self) {
        self.compactions_deferred.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_orphans(&self, count: usize) {
        self.orphans_collected
            .fetch_add(count as u64, Ordering::SeqCst);
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        format!(
            r#"# HELP chronokg_facts_extracted_total Atomic facts extracted
# TYPE chronokg_facts_extracted_total counter
chronokg_facts_extracted_total {}
# HELP chronokg_facts_skipped_total Atomic facts skipped after failure or timeout
# TYPE chronokg_facts_skipped_total counter
chronokg_facts_skipped_total {}
# HELP chronokg_relations_filtered_total Relationships filtered before write
# TYPE chronokg_relations_filtered_total counter
chronokg_relations_filtered_total {}
# HELP chronokg_provider_failures_total Provider calls that failed after retries
# TYPE chronokg_provider_failures_total counter
chronokg_provider_failures_total {}
# HELP chronokg_store_write_failures_total Graph writes that failed after retries
# TYPE chronokg_store_write_failures_total counter
chronokg_store_write_failures_total {}
# HELP chronokg_deltas_written_total Community delta summaries stored
# TYPE chronokg_deltas_written_total counter
chronokg_deltas_written_total {}
# HELP chronokg_compactions_total Community compactions committed
# TYPE chronokg_compactions_total counter
chronokg_compactions_total {}
# HELP chronokg_compactions_deferred_total Community compactions deferred
# TYPE chronokg_compactions_deferred_total counter
chronokg_compactions_deferred_total {}
# HELP chronokg_orphan_deltas_collected_total Orphaned deltas removed
# TYPE chronokg_orphan_deltas_collected_total counter
chronokg_orphan_deltas_collected_total {}
"#,
            self.facts_extracted.load(Ordering::SeqCst),
            self.facts_skipped.load(Ordering::SeqCst),
            self.relations_filtered.load(Ordering::SeqCst),
            self.provider_failures.load(Ordering::SeqCst),
            self.store_write_failures.load(Ordering::SeqCst),
            self.deltas_written.load(Ordering::SeqCst),
            self.compactions_total.load(Ordering::SeqCst),
            self.compactions_deferred.load(Ordering::SeqCst),
            self.orphans_collected.load(Ordering::SeqCst),
        )
    }
}

// ===== Structured Logging =====

/// 初始化日志
///
/// `RUST_LOG` 优先于配置中的级别。配置了 `log_dir` 时额外写入按天滚动的 JSON 日志文件，
/// 返回的 guard 需要持有到进程退出。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Config(format!("invalid log level: {}", e)))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.structured {
        layers.push(fmt::layer().json().with_target(true).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(dir) = &config.log_dir {
        let appender = tracing_appender::rolling::daily(dir, "chronokg.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::Config(format!("failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}
