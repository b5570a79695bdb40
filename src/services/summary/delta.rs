//! 增量摘要
//!
//! delta 只描述新加入社区的实体。生成 delta 不读取社区的基础摘要和已有 delta，
//! 写入成本只与变化量成正比。

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RelationKeyMode;
use crate::error::{FailureRecord, Result};
use crate::models::{CommunityDelta, Entity, Relationship};
use crate::observability::PipelineMetrics;
use crate::providers::LanguageModel;
use crate::storage::{CommunityStore, GraphStore};

/// 摘要层使用的文本生成接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// 只描述新实体带来的内容
    async fn summarize_delta(
        &self,
        community_id: &str,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> Result<String>;

    /// 把 pending delta 融合进一份连贯的基础摘要
    async fn fuse(&self, base_summary: &str, deltas: &[String]) -> Result<String>;

    /// 从头摘要整个社区
    async fn summarize_full(
        &self,
        community_id: &str,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> Result<String>;
}

fn describe_entities(entities: &[Entity]) -> String {
    entities
        .iter()
        .map(|e| {
            let aliases: Vec<&str> = e
                .aliases
                .iter()
                .map(String::as_str)
                .filter(|a| *a != e.name)
                .collect();
            if aliases.is_empty() {
                format!("- {} ({})", e.name, e.label)
            } else {
                format!("- {} ({}; also known as {})", e.name, e.label, aliases.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_relationships(relationships: &[Relationship]) -> String {
    relationships
        .iter()
        .map(|r| {
            let status = if r.is_current() { "current" } else { "ended" };
            format!("- {} {} {} ({})", r.source_id, r.rel_type, r.target_id, status)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 基于 LLM 的摘要生成
pub struct LlmSummarizer {
    llm: Arc<dyn LanguageModel>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize_delta(
        &self,
        community_id: &str,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> Result<String> {
        let prompt = format!(
            "New information was added to community {}. In 50 to 200 tokens, describe only \
             what these additions contribute. Do not restate anything else.\n\n\
             New entities:\n{}\n\nRelationships among them:\n{}",
            community_id,
            describe_entities(entities),
            describe_relationships(relationships)
        );
        Ok(self.llm.complete(&prompt).await?.trim().to_string())
    }

    async fn fuse(&self, base_summary: &str, deltas: &[String]) -> Result<String> {
        let prompt = format!(
            "Merge the existing community summary with the recent updates into one coherent \
             summary. Resolve contradictions in favour of the updates.\n\n\
             Existing summary:\n{}\n\nRecent updates:\n{}",
            base_summary,
            deltas.join("\n")
        );
        Ok(self.llm.complete(&prompt).await?.trim().to_string())
    }

    async fn summarize_full(
        &self,
        community_id: &str,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> Result<String> {
        let prompt = format!(
            "Write a summary of community {} covering its members and how they relate.\n\n\
             Members:\n{}\n\nRelationships:\n{}",
            community_id,
            describe_entities(entities),
            describe_relationships(relationships)
        );
        Ok(self.llm.complete(&prompt).await?.trim().to_string())
    }
}

/// 按 ID 取实体，以及两端都在其中的关系
pub async fn collect_subgraph(
    graph: &dyn GraphStore,
    entity_ids: &[String],
) -> Result<(Vec<Entity>, Vec<Relationship>)> {
    let mut entities = Vec::new();
    for id in entity_ids.iter().collect::<BTreeSet<_>>() {
        match graph.get_entity(id).await? {
            Some(entity) => entities.push(entity),
            None => debug!(entity = %id, "entity not found, skipped"),
        }
    }

    let ids: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut relationships: BTreeMap<String, Relationship> = BTreeMap::new();
    for entity in &entities {
        for relationship in graph.query_related(&entity.id).await? {
            if ids.contains(relationship.source_id.as_str()) && ids.contains(relationship.target_id.as_str()) {
                relationships.insert(relationship.rel_id(RelationKeyMode::Provenance), relationship);
            }
        }
    }

    Ok((entities, relationships.into_values().collect()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeltaReport {
    /// 已写入的 delta ID
    pub created: Vec<String>,
    /// 本次未产生 delta 的社区
    pub skipped: Vec<String>,
    /// 基础摘要被全量重建的社区（DSA 关闭时）
    pub regenerated: Vec<String>,
    pub failures: Vec<FailureRecord>,
}

pub struct DeltaSummarizer {
    graph: Arc<dyn GraphStore>,
    communities: Arc<dyn CommunityStore>,
    summarizer: Arc<dyn Summarizer>,
    max_concurrency: usize,
    metrics: Arc<PipelineMetrics>,
}

impl DeltaSummarizer {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        communities: Arc<dyn CommunityStore>,
        summarizer: Arc<dyn Summarizer>,
        max_concurrency: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            graph,
            communities,
            summarizer,
            max_concurrency: max_concurrency.max(1),
            metrics,
        }
    }

    /// 生成并写入一条 delta；没有内容时返回 `Ok(None)`
    pub async fn create_delta(
        &self,
        community_id: &str,
        new_entity_ids: &[String],
    ) -> Result<Option<CommunityDelta>> {
        let (entities, relationships) = collect_subgraph(self.graph.as_ref(), new_entity_ids).await?;
        if entities.is_empty() {
            debug!(community = community_id, "no new entities resolved, no delta");
            return Ok(None);
        }

        let summary = self
            .summarizer
            .summarize_delta(community_id, &entities, &relationships)
            .await?;
        if summary.trim().is_empty() {
            warn!(community = community_id, "empty delta summary discarded");
            return Ok(None);
        }

        let related: Vec<String> = entities.into_iter().map(|e| e.id).collect();
        let delta = CommunityDelta::new(community_id, &summary, related);
        self.communities.append_delta(delta.clone()).await?;
        self.metrics.record_delta();

        debug!(
            community = community_id,
            delta = %delta.id,
            tokens = delta.summary_tokens,
            "delta stored"
        );
        Ok(Some(delta))
    }

    /// 每个社区一条 delta，社区之间并发处理
    pub async fn process_deltas(&self, targets: &HashMap<String, Vec<String>>) -> DeltaReport {
        let mut ordered: Vec<(&String, &Vec<String>)> = targets.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        let outcomes: Vec<(String, Result<Option<CommunityDelta>>)> = stream::iter(ordered)
            .map(|(community_id, entity_ids)| async move {
                (community_id.clone(), self.create_delta(community_id, entity_ids).await)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = DeltaReport::default();
        for (community_id, outcome) in outcomes {
            match outcome {
                Ok(Some(delta)) => report.created.push(delta.id),
                Ok(None) => report.skipped.push(community_id),
                Err(err) => {
                    warn!(community = %community_id, error = %err, "delta summary failed");
                    self.metrics.record_provider_failure();
                    report.failures.push(FailureRecord::new(community_id, &err));
                }
            }
        }
        report.created.sort();
        report.skipped.sort();
        report.failures.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "delta processing finished"
        );
        report
    }
}
