//! 五元组抽取
//!
//! 每个原子事实独立抽取 (subject, predicate, object, t_start, t_end)，由 worker 上限
//! 控制并发。单个事实失败或超时只记为跳过，不会使整批失败。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RelationKeyMode;
use crate::error::{AppError, FailureRecord, Result};
use crate::models::{AtomicFact, Entity, KnowledgeGraph, Observation, Relationship};
use crate::providers::llm::strip_code_fence;
use crate::providers::{EmbeddingModel, LanguageModel};

/// 实体提及
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl EntityMention {
    pub fn new(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }
}

/// 带时间范围的五元组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quintuple {
    pub subject: EntityMention,
    pub predicate: String,
    pub object: EntityMention,
    pub t_start: Option<DateTime<Utc>>,
    pub t_end: Option<DateTime<Utc>>,
}

impl Quintuple {
    pub fn new(subject: EntityMention, predicate: &str, object: EntityMention) -> Self {
        Self {
            subject,
            predicate: predicate.to_string(),
            object,
            t_start: None,
            t_end: None,
        }
    }

    pub fn starting(mut self, t_start: DateTime<Utc>) -> Self {
        self.t_start = Some(t_start);
        self
    }

    pub fn ending(mut self, t_end: DateTime<Utc>) -> Self {
        self.t_end = Some(t_end);
        self
    }
}

/// 单个事实的抽取接口
///
/// `observed_at` 是系统获知此事实的时间，不一定是事实生效的时间。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, fact: &AtomicFact, observed_at: DateTime<Utc>) -> Result<Vec<Quintuple>>;
}

#[derive(Debug, Deserialize)]
struct RawQuintuple {
    subject: String,
    #[serde(default)]
    subject_label: String,
    #[serde(default)]
    subject_aliases: Vec<String>,
    predicate: String,
    object: String,
    #[serde(default)]
    object_label: String,
    #[serde(default)]
    object_aliases: Vec<String>,
    #[serde(default)]
    t_start: Option<String>,
    #[serde(default)]
    t_end: Option<String>,
}

/// 解析 RFC3339 或 YYYY-MM-DD 日期
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// LLM 驱动的抽取器
pub struct LlmTupleExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl LlmTupleExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn prompt(fact: &AtomicFact, observed_at: DateTime<Utc>) -> String {
        format!(
            "Extract relational knowledge from the statement as a JSON array of objects with \
             fields subject, subject_label, subject_aliases, predicate, object, object_label, \
             object_aliases, t_start, t_end. Predicates are UPPER_SNAKE_CASE. Dates use \
             YYYY-MM-DD or RFC3339. Set t_end only when the statement says the relation \
             stopped holding; if no date is given for that, use the observation date. \
             Observation date: {}.\n\nStatement: {}",
            observed_at.format("%Y-%m-%d"),
            fact.text
        )
    }

    pub fn parse(raw: &str, observed_at: DateTime<Utc>) -> Result<Vec<Quintuple>> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let slice = match (body.find('['), body.rfind(']')) {
            (Some(start), Some(end)) if end > start => &body[start..=end],
            _ => body,
        };
        let rows: Vec<RawQuintuple> = serde_json::from_str(slice)
            .map_err(|e| AppError::Extraction(format!("unparseable extraction output: {}", e)))?;

        Ok(rows
            .into_iter()
            .filter(|row| !row.subject.trim().is_empty() && !row.object.trim().is_empty())
            .map(|row| {
                let t_end = row.t_end.as_deref().and_then(|v| {
                    parse_timestamp(v).or_else(|| (!v.trim().is_empty()).then_some(observed_at))
                });
                Quintuple {
                    subject: EntityMention {
                        name: row.subject,
                        label: row.subject_label,
                        aliases: row.subject_aliases,
                    },
                    predicate: row.predicate,
                    object: EntityMention {
                        name: row.object,
                        label: row.object_label,
                        aliases: row.object_aliases,
                    },
                    t_start: row.t_start.as_deref().and_then(parse_timestamp),
                    t_end,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Extractor for LlmTupleExtractor {
    async fn extract(&self, fact: &AtomicFact, observed_at: DateTime<Utc>) -> Result<Vec<Quintuple>> {
        let raw = self.llm.complete(&Self::prompt(fact, observed_at)).await?;
        Self::parse(&raw, observed_at)
    }
}

/// 抽取报告
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub facts_total: usize,
    pub facts_extracted: usize,
    pub facts_skipped: usize,
    pub facts_empty: usize,
    pub tuples: usize,
    pub provider_failures: usize,
    pub timeouts: usize,
    pub failures: Vec<FailureRecord>,
}

impl ExtractionReport {
    fn record_failure(&mut self, fact_id: &str, err: &AppError) {
        self.facts_skipped += 1;
        match err {
            AppError::Timeout(_) => self.timeouts += 1,
            AppError::Provider(_) | AppError::Embedding(_) => self.provider_failures += 1,
            _ => {}
        }
        self.failures.push(FailureRecord::new(fact_id, err));
    }
}

/// 并行抽取驱动
pub struct TupleExtractor {
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn EmbeddingModel>,
    max_workers: usize,
    timeout: Duration,
}

impl TupleExtractor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn EmbeddingModel>,
        max_workers: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            embedder,
            max_workers: max_workers.max(1),
            timeout,
        }
    }

    /// 每个事实产出一张原子图；结果按事实输入顺序排列
    pub async fn extract_all(
        &self,
        facts: &[AtomicFact],
        observed_at: DateTime<Utc>,
    ) -> (Vec<KnowledgeGraph>, ExtractionReport) {
        let mut report = ExtractionReport {
            facts_total: facts.len(),
            ..ExtractionReport::default()
        };

        let outcomes: Vec<(usize, Result<(KnowledgeGraph, usize)>)> = stream::iter(facts.iter().enumerate())
            .map(|(index, fact)| async move {
                let outcome = match tokio::time::timeout(self.timeout, self.extract_fact(fact, observed_at)).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(AppError::from(elapsed)),
                };
                (index, outcome)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut ordered: BTreeMap<usize, Result<(KnowledgeGraph, usize)>> = outcomes.into_iter().collect();
        let mut graphs = Vec::with_capacity(ordered.len());

        for (index, fact) in facts.iter().enumerate() {
            match ordered.remove(&index) {
                Some(Ok((graph, tuples))) => {
                    report.facts_extracted += 1;
                    report.tuples += tuples;
                    if graph.is_empty() {
                        report.facts_empty += 1;
                    } else {
                        graphs.push(graph);
                    }
                }
                Some(Err(err)) => {
                    warn!(fact = %fact.id, error = %err, "fact skipped");
                    report.record_failure(&fact.id, &err);
                }
                None => {}
            }
        }

        info!(
            total = report.facts_total,
            extracted = report.facts_extracted,
            skipped = report.facts_skipped,
            tuples = report.tuples,
            "extraction finished"
        );
        (graphs, report)
    }

    async fn extract_fact(&self, fact: &AtomicFact, observed_at: DateTime<Utc>) -> Result<(KnowledgeGraph, usize)> {
        let tuples = self.extractor.extract(fact, observed_at).await?;
        let count = tuples.len();
        let graph = self.build_graph(fact, tuples, observed_at).await?;
        debug!(fact = %fact.id, tuples = count, "fact extracted");
        Ok((graph, count))
    }

    /// 把一个事实的五元组构造成原子图，并计算名称与关系类型的嵌入
    async fn build_graph(
        &self,
        fact: &AtomicFact,
        tuples: Vec<Quintuple>,
        observed_at: DateTime<Utc>,
    ) -> Result<KnowledgeGraph> {
        if tuples.is_empty() {
            return Ok(KnowledgeGraph::default());
        }

        let entity_observation = Observation::open(observed_at);
        let mut mentions: Vec<Entity> = Vec::new();
        let mut relationships: Vec<Relationship> = Vec::new();

        for tuple in tuples {
            let subject = mention_entity(&tuple.subject, entity_observation);
            let object = mention_entity(&tuple.object, entity_observation);

            let observation = Observation::new(
                observed_at,
                tuple.t_start.unwrap_or(observed_at),
                tuple.t_end,
            );
            let relationship = Relationship::new(&subject.id, &object.id, &tuple.predicate, &fact.source_chunk_id)
                .with_observation(observation)
                .with_atomic_fact(&fact.id);
            mentions.push(subject);
            mentions.push(object);

            let key = relationship.rel_id(RelationKeyMode::Endpoints);
            match relationships
                .iter()
                .position(|r| r.rel_id(RelationKeyMode::Endpoints) == key)
            {
                Some(index) => {
                    let existing = relationships.swap_remove(index);
                    relationships.push(Relationship::merge(existing, relationship));
                }
                None => relationships.push(relationship),
            }
        }

        // 先嵌入再按 ID 折叠，成员保留各自的名称向量
        let names: Vec<String> = mentions.iter().map(|e| e.name.clone()).collect();
        let name_vectors = self.embedder.encode_batch(&names).await?;
        for (entity, vector) in mentions.iter_mut().zip(name_vectors) {
            entity.embedding = vector;
        }

        let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
        for entity in mentions {
            match entities.remove(&entity.id) {
                Some(existing) => {
                    let merged = Entity::merge(existing, entity);
                    entities.insert(merged.id.clone(), merged);
                }
                None => {
                    entities.insert(entity.id.clone(), entity);
                }
            }
        }
        let entities: Vec<Entity> = entities.into_values().collect();

        let types: Vec<String> = relationships
            .iter()
            .map(|r| r.rel_type.replace('_', " ").to_lowercase())
            .collect();
        let type_vectors = self.embedder.encode_batch(&types).await?;
        for (relationship, vector) in relationships.iter_mut().zip(type_vectors) {
            relationship.embedding = vector;
        }

        Ok(KnowledgeGraph::new(entities, relationships))
    }
}

fn mention_entity(mention: &EntityMention, observation: Observation) -> Entity {
    let mut entity = Entity::new(&mention.name, &mention.label).with_observation(observation);
    for alias in &mention.aliases {
        entity.add_alias(alias);
    }
    entity
}
