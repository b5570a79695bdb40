//! 批量写入
//!
//! 先写实体再写关系；每个批次独立按退避策略重试。某个批次重试耗尽后停止写入，
//! 失败记录进报告，调用方保留内存中的图以便稍后重试。

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::error::FailureRecord;
use crate::models::KnowledgeGraph;
use crate::providers::retry::{RetryPolicy, retry_with_backoff};
use crate::storage::repository::GraphStore;

/// 写入报告
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReport {
    pub entities_written: usize,
    pub relationships_written: usize,
    pub batches: usize,
    pub retries: u32,
    pub error: Option<FailureRecord>,
}

impl WriteReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct BatchWriter {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn GraphStore>, batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    pub fn from_config(store: Arc<dyn GraphStore>, config: &StoreConfig, policy: RetryPolicy) -> Self {
        Self::new(
            store,
            config.write_batch_size,
            policy.with_max_attempts(config.write_attempts),
        )
    }

    pub async fn write(&self, graph: &KnowledgeGraph) -> WriteReport {
        let mut report = WriteReport::default();
        let attempts = AtomicU32::new(0);

        for (index, batch) in graph.entities.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            let result = retry_with_backoff(&self.policy, "store.upsert_entities", || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.store.upsert_entities(batch)
            })
            .await;
            match result {
                Ok(written) => report.entities_written += written,
                Err(err) => {
                    error!(batch = index, error = %err, "entity batch write failed");
                    report.error = Some(FailureRecord::new(format!("entities[{}]", index), &err));
                    report.retries = attempts.load(Ordering::Relaxed).saturating_sub(report.batches as u32);
                    return report;
                }
            }
        }

        for (index, batch) in graph.relationships.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            let result = retry_with_backoff(&self.policy, "store.upsert_relationships", || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.store.upsert_relationships(batch)
            })
            .await;
            match result {
                Ok(written) => report.relationships_written += written,
                Err(err) => {
                    error!(batch = index, error = %err, "relationship batch write failed");
                    report.error = Some(FailureRecord::new(format!("relationships[{}]", index), &err));
                    report.retries = attempts.load(Ordering::Relaxed).saturating_sub(report.batches as u32);
                    return report;
                }
            }
        }

        report.retries = attempts.load(Ordering::Relaxed).saturating_sub(report.batches as u32);
        info!(
            entities = report.entities_written,
            relationships = report.relationships_written,
            batches = report.batches,
            retries = report.retries,
            "graph written"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::{Entity, Relationship};
    use crate::storage::memory::InMemoryStore;
    use async_trait::async_trait;

    /// 前 N 次写入失败的存储
    struct FlakyStore {
        inner: InMemoryStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures_left: AtomicU32::new(failures),
            }
        }

        fn fail(&self) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(AppError::Store("unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn upsert_entities(&self, entities: &[Entity]) -> Result<usize> {
            self.fail()?;
            self.inner.upsert_entities(entities).await
        }

        async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize> {
            self.fail()?;
            self.inner.upsert_relationships(relationships).await
        }

        async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
            self.inner.get_entity(id).await
        }

        async fn query_related(&self, id: &str) -> Result<Vec<Relationship>> {
            self.inner.query_related(id).await
        }
    }

    fn graph(entities: usize) -> KnowledgeGraph {
        let entities: Vec<Entity> = (0..entities)
            .map(|i| Entity::new(&format!("E{}", i), "Thing"))
            .collect();
        let rels = vec![Relationship::new(&entities[0].id, &entities[1].id, "LINKS", "c1")];
        KnowledgeGraph::new(entities, rels)
    }

    #[tokio::test]
    async fn test_writes_in_batches() {
        let store = Arc::new(InMemoryStore::new());
        let writer = BatchWriter::new(store.clone(), 2, RetryPolicy::immediate(3));

        let report = writer.write(&graph(5)).await;
        assert!(report.is_success());
        assert_eq!(report.entities_written, 5);
        assert_eq!(report.relationships_written, 1);
        assert_eq!(report.batches, 4);
        assert_eq!(report.retries, 0);
        assert_eq!(store.entity_count(), 5);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let writer = BatchWriter::new(store.clone(), 10, RetryPolicy::immediate(3));

        let report = writer.write(&graph(3)).await;
        assert!(report.is_success());
        assert_eq!(report.retries, 2);
        assert_eq!(store.inner.entity_count(), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_reported() {
        let store = Arc::new(FlakyStore::new(100));
        let writer = BatchWriter::new(store, 10, RetryPolicy::immediate(3));

        let report = writer.write(&graph(3)).await;
        assert!(!report.is_success());
        let error = report.error.unwrap();
        assert_eq!(error.unit_id, "entities[0]");
        assert_eq!(error.code, "STORE");
        assert_eq!(report.entities_written, 0);
    }
}
