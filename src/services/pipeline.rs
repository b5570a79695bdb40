//! 端到端摄取
//!
//! chunk → 原子事实 → 每个事实一张小图 → 并行归并 → 并入分区当前图 → 校验 → 写入。
//! 分解与抽取不持有任何锁；并入与写入按分区串行，不做全局串行。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, FailureRecord, Result};
use crate::models::{AtomicFact, KnowledgeGraph, TextChunk};
use crate::observability::PipelineMetrics;
use crate::providers::{EmbeddingModel, RetryPolicy};
use crate::services::extraction::{ExtractionReport, Extractor, FactDecomposer, TupleExtractor};
use crate::services::resolution::{MergeStats, ParallelMerger};
use crate::services::validator::{ConsistencyValidator, ValidationReport};
use crate::storage::{BatchWriter, GraphStore, WriteReport};

#[derive(Default)]
struct PartitionState {
    graph: KnowledgeGraph,
    /// 已在内存中合并但尚未持久化
    dirty: bool,
}

/// 一次摄取调用的完整报告，计数字段总会填充
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub partition: String,
    pub chunks: usize,
    pub chunk_failures: Vec<FailureRecord>,
    pub extraction: ExtractionReport,
    pub merge: MergeStats,
    pub validation: ValidationReport,
    pub write: WriteReport,
    pub entities: usize,
    pub relationships: usize,
    /// 本次调用前分区中不存在的实体 ID
    pub new_entities: Vec<String>,
    /// 非致命问题（如被过滤的悬空关系）
    pub warnings: Vec<FailureRecord>,
}

impl IngestReport {
    pub fn facts_skipped(&self) -> usize {
        self.extraction.facts_skipped
    }

    pub fn filtered_relations(&self) -> usize {
        self.validation.filtered
    }

    pub fn provider_failures(&self) -> usize {
        self.extraction.provider_failures
            + self
                .chunk_failures
                .iter()
                .filter(|f| f.code == "PROVIDER" || f.code == "TIMEOUT")
                .count()
    }

    pub fn is_persisted(&self) -> bool {
        self.write.is_success()
    }
}

pub struct IngestPipeline {
    decomposer: Arc<dyn FactDecomposer>,
    extractor: TupleExtractor,
    merger: Arc<ParallelMerger>,
    validator: ConsistencyValidator,
    writer: BatchWriter,
    partitions: DashMap<String, Arc<Mutex<PartitionState>>>,
    metrics: Arc<PipelineMetrics>,
}

impl IngestPipeline {
    pub fn new(
        decomposer: Arc<dyn FactDecomposer>,
        extractor: TupleExtractor,
        merger: ParallelMerger,
        writer: BatchWriter,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            decomposer,
            extractor,
            merger: Arc::new(merger),
            validator: ConsistencyValidator::default(),
            writer,
            partitions: DashMap::new(),
            metrics,
        }
    }

    /// 按配置组装管线
    pub fn from_config(
        config: &AppConfig,
        decomposer: Arc<dyn FactDecomposer>,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn EmbeddingModel>,
        store: Arc<dyn GraphStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let extractor = TupleExtractor::new(
            extractor,
            embedder,
            config.atom.max_workers,
            Duration::from_secs(config.atom.extraction_timeout_secs),
        );
        let merger = ParallelMerger::new(&config.atom)?;
        let writer = BatchWriter::from_config(store, &config.store, RetryPolicy::from_config(&config.retry));
        Ok(Self::new(decomposer, extractor, merger, writer, metrics))
    }

    fn partition(&self, partition: &str) -> Arc<Mutex<PartitionState>> {
        self.partitions
            .entry(partition.to_string())
            .or_default()
            .clone()
    }

    pub async fn ingest(
        &self,
        partition: &str,
        chunks: &[TextChunk],
        observed_at: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            partition: partition.to_string(),
            chunks: chunks.len(),
            ..IngestReport::default()
        };

        let decomposed = join_all(chunks.iter().map(|chunk| self.decomposer.decompose(chunk))).await;
        let mut facts: Vec<AtomicFact> = Vec::new();
        for (chunk, outcome) in chunks.iter().zip(decomposed) {
            match outcome {
                Ok(chunk_facts) => facts.extend(chunk_facts),
                Err(err) => {
                    warn!(chunk = %chunk.id, error = %err, "chunk decomposition failed");
                    report.chunk_failures.push(FailureRecord::new(chunk.id.as_str(), &err));
                }
            }
        }

        let (graphs, extraction) = self.extractor.extract_all(&facts, observed_at).await;
        self.metrics
            .record_extraction(extraction.facts_extracted, extraction.facts_skipped);
        self.metrics.record_provider_failures(
            extraction.provider_failures
                + report
                    .chunk_failures
                    .iter()
                    .filter(|f| f.code == "PROVIDER" || f.code == "TIMEOUT")
                    .count(),
        );
        report.extraction = extraction;

        let merger = self.merger.clone();
        let (batch, merge_stats) = tokio::task::spawn_blocking(move || merger.merge_all(graphs))
            .await
            .map_err(|e| AppError::Internal(format!("merge task failed: {}", e)))?;
        report.merge = merge_stats;

        let lock = self.partition(partition);
        let mut state = lock.lock().await;

        let before: BTreeSet<String> = state.graph.entities.iter().map(|e| e.id.clone()).collect();
        let merger = self.merger.clone();
        let merged = merge_blocking(&state.graph, move |existing| merger.merge(existing, batch)).await?;

        let (valid, validation) = self.validator.validate(merged);
        self.metrics.record_filtered(validation.filtered);
        if let Some(err) = validation.integrity_error() {
            report.warnings.push(FailureRecord::new(partition, &err));
        }
        report.validation = validation;

        report.new_entities = valid
            .entities
            .iter()
            .filter(|e| !before.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();
        report.entities = valid.entities.len();
        report.relationships = valid.relationships.len();

        report.write = self.writer.write(&valid).await;
        state.graph = valid;
        state.dirty = !report.write.is_success();
        if state.dirty {
            self.metrics.record_store_failure();
            warn!(partition, "graph kept in memory after failed write; call flush to retry");
        }

        info!(
            partition,
            facts = report.extraction.facts_total,
            skipped = report.extraction.facts_skipped,
            filtered = report.validation.filtered,
            entities = report.entities,
            relationships = report.relationships,
            persisted = report.is_persisted(),
            "ingest finished"
        );
        Ok(report)
    }

    /// 重试持久化上次写入失败的分区，不重新抽取
    pub async fn flush(&self, partition: &str) -> Result<WriteReport> {
        let lock = self
            .partitions
            .get(partition)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("partition {}", partition)))?;
        let mut state = lock.lock().await;
        if !state.dirty {
            return Ok(WriteReport::default());
        }

        let report = self.writer.write(&state.graph).await;
        state.dirty = !report.is_success();
        if state.dirty {
            self.metrics.record_store_failure();
        } else {
            info!(partition, "pending graph flushed");
        }
        Ok(report)
    }

    pub async fn is_dirty(&self, partition: &str) -> bool {
        match self.partitions.get(partition).map(|entry| entry.value().clone()) {
            Some(lock) => lock.lock().await.dirty,
            None => false,
        }
    }

    pub async fn current_graph(&self, partition: &str) -> Option<KnowledgeGraph> {
        let lock = self.partitions.get(partition).map(|entry| entry.value().clone())?;
        let state = lock.lock().await;
        Some(state.graph.clone())
    }
}

/// 在阻塞线程池上合并；只借用分区当前图，任务失败时原图不受影响
async fn merge_blocking<F>(current: &KnowledgeGraph, merge: F) -> Result<KnowledgeGraph>
where
    F: FnOnce(KnowledgeGraph) -> KnowledgeGraph + Send + 'static,
{
    let existing = current.clone();
    tokio::task::spawn_blocking(move || merge(existing))
        .await
        .map_err(|e| AppError::Internal(format!("merge task failed: {}", e)))
}
