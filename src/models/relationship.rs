//! 关系数据模型
//!
//! 有向、带类型、带时序的边。关系的去重键由端点、类型以及（可选的）来源 chunk 组成。

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::RelationKeyMode;
use crate::models::temporal::{Observation, Temporal};

static LABEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\x{4e00}-\x{9fa5}]+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

/// 清理关系类型，使其可作为存储层的关系标签
pub fn sanitize_relation_type(value: &str) -> String {
    let replaced = LABEL_PATTERN.replace_all(value.trim(), "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "RELATED".to_string()
    } else {
        trimmed.to_uppercase()
    }
}

/// 关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// 源实体 ID
    pub source_id: String,

    /// 目标实体 ID
    pub target_id: String,

    /// 关系类型
    #[serde(rename = "type")]
    pub rel_type: String,

    /// 键值属性
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,

    /// 观察记录
    #[serde(flatten)]
    pub temporal: Temporal,

    /// 支撑此关系的原子事实 ID
    #[serde(default)]
    pub atomic_facts: Vec<String>,

    /// 置信度 (0.0-1.0)
    pub confidence: f32,

    /// 关系类型的嵌入向量
    #[serde(default)]
    pub embedding: Vec<f32>,

    /// 来源 chunk
    pub source_chunk_id: String,
}

impl Relationship {
    /// 创建新关系
    pub fn new(source_id: &str, target_id: &str, rel_type: &str, source_chunk_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rel_type: sanitize_relation_type(rel_type),
            properties: HashMap::new(),
            temporal: Temporal::default(),
            atomic_facts: Vec::new(),
            confidence: 1.0,
            embedding: Vec::new(),
            source_chunk_id: source_chunk_id.to_string(),
        }
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.temporal.push(observation);
        self
    }

    pub fn with_atomic_fact(mut self, fact_id: &str) -> Self {
        if !self.atomic_facts.iter().any(|f| f == fact_id) {
            self.atomic_facts.push(fact_id.to_string());
        }
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// 端点去重键 (source, target)，用于候选检索
    pub fn endpoints(&self) -> (&str, &str) {
        (self.source_id.as_str(), self.target_id.as_str())
    }

    /// 稳定的关系 ID
    pub fn rel_id(&self, mode: RelationKeyMode) -> String {
        match mode {
            RelationKeyMode::Endpoints => {
                format!("{}-[{}]->{}", self.source_id, self.rel_type, self.target_id)
            }
            RelationKeyMode::Provenance => format!(
                "{}-[{}]->{}@{}",
                self.source_id, self.rel_type, self.target_id, self.source_chunk_id
            ),
        }
    }

    /// 最早观察时间
    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.temporal.earliest_obs()
    }

    /// 最近一次观察给出的结束时间
    pub fn latest_t_end(&self) -> Option<DateTime<Utc>> {
        self.temporal.latest().and_then(|obs| obs.t_end)
    }

    /// 最近一次观察是否仍然有效
    pub fn is_current(&self) -> bool {
        self.temporal.latest().is_some_and(|obs| obs.t_end.is_none())
    }

    /// 将端点映射到规范实体 ID
    pub fn remap_endpoints(&mut self, remap: &HashMap<String, String>) {
        if let Some(id) = resolve_alias_chain(remap, &self.source_id) {
            self.source_id = id;
        }
        if let Some(id) = resolve_alias_chain(remap, &self.target_id) {
            self.target_id = id;
        }
    }

    /// 合并优先级：最早观察在前，其次完整关系 ID 字典序最小
    pub fn precedes(&self, other: &Relationship) -> bool {
        let own = (
            self.first_seen().unwrap_or(DateTime::<Utc>::MAX_UTC),
            self.rel_id(RelationKeyMode::Provenance),
        );
        let theirs = (
            other.first_seen().unwrap_or(DateTime::<Utc>::MAX_UTC),
            other.rel_id(RelationKeyMode::Provenance),
        );
        own <= theirs
    }

    /// 合并两条表示同一事实的关系
    ///
    /// 时序列表与 atomic_facts 追加而非覆盖；类型、来源 chunk 取优先级靠前者；
    /// 置信度取最大值。结果与参数顺序无关。
    pub fn merge(a: Relationship, b: Relationship) -> Relationship {
        let (first, second) = if a.precedes(&b) { (a, b) } else { (b, a) };

        let embedding = if second.temporal.len() > first.temporal.len() {
            second.embedding.clone()
        } else {
            first.embedding.clone()
        };

        let mut properties = second.properties;
        properties.extend(first.properties);

        let mut temporal = first.temporal;
        temporal.extend(&second.temporal);

        let atomic_facts: BTreeSet<String> = first
            .atomic_facts
            .into_iter()
            .chain(second.atomic_facts)
            .collect();

        Relationship {
            source_id: first.source_id,
            target_id: first.target_id,
            rel_type: first.rel_type,
            properties,
            temporal,
            atomic_facts: atomic_facts.into_iter().collect(),
            confidence: first.confidence.max(second.confidence),
            embedding,
            source_chunk_id: first.source_chunk_id,
        }
    }
}

/// 沿映射链找到最终的规范 ID
pub fn resolve_alias_chain(remap: &HashMap<String, String>, id: &str) -> Option<String> {
    let mut current = remap.get(id)?;
    let mut hops = 0;
    while let Some(next) = remap.get(current) {
        if next == current || hops > remap.len() {
            break;
        }
        current = next;
        hops += 1;
    }
    Some(current.clone())
}
