//! 社区摘要与增量摘要累积（DSA）
//!
//! 更新时追加小的 delta 摘要，读取时合并基础摘要与 delta，后台压缩器把 delta 折叠进基础摘要。
//! 关闭 DSA 时每次更新都全量重建基础摘要。

pub mod compactor;
pub mod delta;
pub mod locks;
pub mod read_merger;

pub use compactor::{CommunityCompactor, CompactionOutcome, CompactionReport};
pub use delta::{DeltaReport, DeltaSummarizer, LlmSummarizer, Summarizer};
pub use locks::CommunityLocks;
pub use read_merger::{ReadMerger, merge_summaries};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DsaConfig;
use crate::error::{AppError, FailureRecord, Result};
use crate::observability::PipelineMetrics;
use crate::storage::{CommunityStore, GraphStore};

pub struct CommunitySummaryService {
    config: DsaConfig,
    graph: Arc<dyn GraphStore>,
    communities: Arc<dyn CommunityStore>,
    summarizer: Arc<dyn Summarizer>,
    deltas: DeltaSummarizer,
    reader: ReadMerger,
    compactor: Arc<CommunityCompactor>,
}

impl CommunitySummaryService {
    pub fn new(
        config: DsaConfig,
        graph: Arc<dyn GraphStore>,
        communities: Arc<dyn CommunityStore>,
        summarizer: Arc<dyn Summarizer>,
        max_concurrency: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let deltas = DeltaSummarizer::new(
            graph.clone(),
            communities.clone(),
            summarizer.clone(),
            max_concurrency,
            metrics.clone(),
        );
        let compactor = Arc::new(CommunityCompactor::new(
            communities.clone(),
            summarizer.clone(),
            config.clone(),
            max_concurrency,
            metrics,
        ));
        Self {
            config,
            graph,
            reader: ReadMerger::new(communities.clone()),
            communities,
            summarizer,
            deltas,
            compactor,
        }
    }

    pub fn compactor(&self) -> Arc<CommunityCompactor> {
        self.compactor.clone()
    }

    /// 社区检测器报告的新加入成员
    pub async fn on_members_added(&self, targets: &HashMap<String, Vec<String>>) -> DeltaReport {
        if self.config.enabled {
            return self.deltas.process_deltas(targets).await;
        }

        let mut report = DeltaReport::default();
        let mut ids: Vec<&String> = targets.keys().collect();
        ids.sort();
        for community_id in ids {
            match self.regenerate(community_id, &targets[community_id]).await {
                Ok(()) => report.regenerated.push(community_id.clone()),
                Err(err) => {
                    warn!(community = %community_id, error = %err, "full regeneration failed");
                    report.failures.push(FailureRecord::new(community_id.as_str(), &err));
                }
            }
        }
        report
    }

    /// 跳过 delta，用全部成员重建基础摘要
    pub async fn regenerate(&self, community_id: &str, new_members: &[String]) -> Result<()> {
        let mut community = self
            .communities
            .get_community(community_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("community {}", community_id)))?;

        let members: BTreeSet<String> = community
            .members
            .iter()
            .chain(new_members.iter())
            .cloned()
            .collect();
        community.members = members.into_iter().collect();

        let (entities, relationships) =
            delta::collect_subgraph(self.graph.as_ref(), &community.members).await?;
        let summary = self
            .summarizer
            .summarize_full(community_id, &entities, &relationships)
            .await?;
        community.set_base_summary(summary.trim());
        community.last_compacted_at = Some(chrono::Utc::now());

        info!(
            community = community_id,
            members = community.members.len(),
            tokens = community.summary_tokens,
            "base summary regenerated"
        );
        self.communities.upsert_community(community).await
    }

    pub async fn read_summary(&self, community_id: &str) -> Result<String> {
        self.reader.read(community_id).await
    }

    pub async fn compact_all(&self) -> CompactionReport {
        self.compactor.compact_all().await
    }

    /// 按 `compaction_interval_secs` 启动后台压缩；DSA 或压缩关闭时不启动
    pub fn start_background(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.enabled || !self.config.compaction_enabled {
            info!("background compaction disabled");
            return None;
        }
        let interval = Duration::from_secs(self.config.compaction_interval_secs.max(1));
        Some(self.compactor.clone().spawn_background(interval, shutdown))
    }

    /// 所有社区的读时合并摘要，按社区 ID 排序
    pub async fn read_all(&self) -> Result<Vec<(String, String)>> {
        let mut summaries = Vec::new();
        for community in self.communities.list_communities().await? {
            let summary = self.read_summary(&community.id).await?;
            summaries.push((community.id, summary));
        }
        Ok(summaries)
    }
}
