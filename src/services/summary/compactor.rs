//! 社区压缩
//!
//! 每个社区的状态：stable → compaction_eligible → compacting → stable。pending delta 的
//! 数量或 token 总量超过阈值即可压缩。压缩持有社区级租约，经 summarizer 融合基础摘要与
//! delta，再以 `last_compacted_at` 做比较并交换提交。拿不到租约或 CAS 失败时顺延到下一轮。

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DsaConfig;
use crate::error::{AppError, FailureRecord, Result};
use crate::models::{CommunityDelta, CompactionState};
use crate::observability::PipelineMetrics;
use crate::services::summary::delta::Summarizer;
use crate::services::summary::locks::CommunityLocks;
use crate::storage::CommunityStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompactionOutcome {
    Compacted { folded: usize, summary_tokens: u32 },
    NotEligible,
    Deferred { reason: String },
    /// 社区已不存在，其 delta 留给孤儿回收
    Orphaned,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompactionReport {
    pub compacted: Vec<String>,
    pub deferred: Vec<String>,
    pub not_eligible: usize,
    pub failures: Vec<FailureRecord>,
    pub orphans_removed: usize,
    pub compacted_purged: usize,
}

pub struct CommunityCompactor {
    store: Arc<dyn CommunityStore>,
    summarizer: Arc<dyn Summarizer>,
    locks: CommunityLocks,
    config: DsaConfig,
    max_concurrency: usize,
    metrics: Arc<PipelineMetrics>,
}

impl CommunityCompactor {
    pub fn new(
        store: Arc<dyn CommunityStore>,
        summarizer: Arc<dyn Summarizer>,
        config: DsaConfig,
        max_concurrency: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            summarizer,
            locks: CommunityLocks::new(),
            config,
            max_concurrency: max_concurrency.max(1),
            metrics,
        }
    }

    pub fn locks(&self) -> &CommunityLocks {
        &self.locks
    }

    /// 数量严格大于数量阈值，或 token 严格大于 token 阈值
    pub fn is_eligible(&self, pending: &[CommunityDelta]) -> bool {
        let tokens: u64 = pending.iter().map(|d| d.summary_tokens as u64).sum();
        pending.len() > self.config.delta_count_threshold
            || tokens > self.config.delta_token_threshold as u64
    }

    pub async fn state(&self, community_id: &str) -> Result<CompactionState> {
        if self.locks.is_held(community_id) {
            return Ok(CompactionState::Compacting);
        }
        let pending = self.store.pending_deltas(community_id).await?;
        Ok(if self.is_eligible(&pending) {
            CompactionState::CompactionEligible
        } else {
            CompactionState::Stable
        })
    }

    pub async fn compact(&self, community_id: &str) -> Result<CompactionOutcome> {
        let Some(_lease) = self.locks.try_acquire(community_id) else {
            debug!(community = community_id, "compaction lease held elsewhere, deferring");
            self.metrics.record_compaction_deferred();
            return Ok(CompactionOutcome::Deferred {
                reason: "lease held".into(),
            });
        };

        let Some((community, pending)) = self.store.read_snapshot(community_id).await? else {
            return Ok(CompactionOutcome::Orphaned);
        };
        if !self.is_eligible(&pending) {
            return Ok(CompactionOutcome::NotEligible);
        }

        let summaries: Vec<String> = pending.iter().map(|d| d.summary.clone()).collect();
        let fused = self.summarizer.fuse(&community.base_summary, &summaries).await?;
        if fused.trim().is_empty() {
            return Err(AppError::Extraction(format!(
                "fusion produced an empty summary for {}",
                community_id
            )));
        }

        let folded: Vec<String> = pending.iter().map(|d| d.id.clone()).collect();
        match self
            .store
            .commit_compaction(
                community_id,
                fused.trim(),
                community.last_compacted_at,
                &folded,
                Utc::now(),
            )
            .await
        {
            Ok(updated) => {
                self.metrics.record_compaction();
                info!(
                    community = community_id,
                    folded = folded.len(),
                    tokens = updated.summary_tokens,
                    "community compacted"
                );
                Ok(CompactionOutcome::Compacted {
                    folded: folded.len(),
                    summary_tokens: updated.summary_tokens,
                })
            }
            Err(AppError::Conflict(reason)) => {
                warn!(community = community_id, %reason, "compaction lost the race, deferring");
                self.metrics.record_compaction_deferred();
                Ok(CompactionOutcome::Deferred { reason })
            }
            Err(err) => Err(err),
        }
    }

    /// 一轮清扫：回收孤儿 delta，压缩所有可压缩社区，清理过期的已压缩 delta
    pub async fn compact_all(&self) -> CompactionReport {
        let mut report = CompactionReport::default();
        if !self.config.enabled || !self.config.compaction_enabled {
            return report;
        }

        match self.store.remove_orphan_deltas().await {
            Ok(removed) => {
                report.orphans_removed = removed;
                self.metrics.record_orphans(removed);
            }
            Err(err) => report.failures.push(FailureRecord::new("orphans", &err)),
        }

        let candidates = match self.store.communities_with_pending().await {
            Ok(ids) => ids,
            Err(err) => {
                report.failures.push(FailureRecord::new("scan", &err));
                Vec::new()
            }
        };

        let outcomes: Vec<(String, Result<CompactionOutcome>)> = stream::iter(candidates)
            .map(|community_id| async move {
                let outcome = self.compact(&community_id).await;
                (community_id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (community_id, outcome) in outcomes {
            match outcome {
                Ok(CompactionOutcome::Compacted { .. }) => report.compacted.push(community_id),
                Ok(CompactionOutcome::Deferred { .. }) => report.deferred.push(community_id),
                Ok(CompactionOutcome::NotEligible) | Ok(CompactionOutcome::Orphaned) => {
                    report.not_eligible += 1
                }
                Err(err) => {
                    error!(community = %community_id, error = %err, "compaction failed");
                    report.failures.push(FailureRecord::new(community_id, &err));
                }
            }
        }
        report.compacted.sort();
        report.deferred.sort();

        let cutoff = Utc::now() - ChronoDuration::days(self.config.compacted_retention_days);
        match self.cleanup_compacted_deltas(cutoff).await {
            Ok(purged) => report.compacted_purged = purged,
            Err(err) => report.failures.push(FailureRecord::new("retention", &err)),
        }
        self.locks.prune();

        info!(
            compacted = report.compacted.len(),
            deferred = report.deferred.len(),
            failed = report.failures.len(),
            orphans = report.orphans_removed,
            "compaction sweep finished"
        );
        report
    }

    pub async fn cleanup_compacted_deltas(&self, older_than: chrono::DateTime<Utc>) -> Result<usize> {
        self.store.cleanup_compacted_deltas(older_than).await
    }

    /// 每隔 `interval` 执行一次 `compact_all`，直到 `shutdown` 变为 true
    pub fn spawn_background(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "background compactor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.compact_all().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("background compactor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Community;
    use crate::services::summary::delta::MockSummarizer;
    use crate::storage::InMemoryStore;

    fn compactor(store: Arc<InMemoryStore>, summarizer: MockSummarizer) -> CommunityCompactor {
        CommunityCompactor::new(
            store,
            Arc::new(summarizer),
            DsaConfig::default(),
            4,
            Arc::new(PipelineMetrics::default()),
        )
    }

    async fn store_with_deltas(count: usize, tokens: u32) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_community(Community::new("C1", 0).with_base_summary("B"))
            .await
            .unwrap();
        for i in 0..count {
            store
                .append_delta(CommunityDelta::new("C1", &format!("D{}", i), vec![]).with_tokens(tokens))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_state_machine() {
        let store = store_with_deltas(5, 10).await;
        let compactor = compactor(store.clone(), MockSummarizer::new());
        assert_eq!(compactor.state("C1").await.unwrap(), CompactionState::Stable);

        store
            .append_delta(CommunityDelta::new("C1", "D5", vec![]).with_tokens(10))
            .await
            .unwrap();
        assert_eq!(
            compactor.state("C1").await.unwrap(),
            CompactionState::CompactionEligible
        );

        let _lease = compactor.locks().try_acquire("C1").unwrap();
        assert_eq!(compactor.state("C1").await.unwrap(), CompactionState::Compacting);
    }

    #[tokio::test]
    async fn test_held_lease_defers() {
        let store = store_with_deltas(6, 10).await;
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_fuse().never();
        let compactor = compactor(store, summarizer);

        let _lease = compactor.locks().try_acquire("C1").unwrap();
        assert!(matches!(
            compactor.compact("C1").await.unwrap(),
            CompactionOutcome::Deferred { .. }
        ));
    }

    #[tokio::test]
    async fn test_fusion_failure_keeps_deltas_pending() {
        let store = store_with_deltas(6, 10).await;
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_fuse()
            .returning(|_, _| Err(AppError::Provider("down".into())));
        let compactor = compactor(store.clone(), summarizer);

        let report = compactor.compact_all().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(store.pending_deltas("C1").await.unwrap().len(), 6);
        let community = store.get_community("C1").await.unwrap().unwrap();
        assert_eq!(community.base_summary, "B");
        assert!(community.last_compacted_at.is_none());
    }

    #[tokio::test]
    async fn test_orphans_collected_during_sweep() {
        let store = store_with_deltas(1, 10).await;
        store
            .append_delta(CommunityDelta::new("REMOVED", "stale", vec![]))
            .await
            .unwrap();
        let compactor = compactor(store.clone(), MockSummarizer::new());

        let report = compactor.compact_all().await;
        assert_eq!(report.orphans_removed, 1);
        assert!(report.compacted.is_empty());
        assert_eq!(store.all_deltas().len(), 1);
    }

    #[tokio::test]
    async fn test_background_compactor_stops_on_shutdown() {
        let store = store_with_deltas(6, 10).await;
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_fuse()
            .returning(|base, deltas| Ok(format!("{} + {}", base, deltas.len())));
        let compactor = Arc::new(compactor(store.clone(), summarizer));

        let (tx, rx) = watch::channel(false);
        let handle = compactor.spawn_background(Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let community = store.get_community("C1").await.unwrap().unwrap();
        assert_eq!(community.base_summary, "B + 6");
        assert!(store.pending_deltas("C1").await.unwrap().is_empty());
    }
}
