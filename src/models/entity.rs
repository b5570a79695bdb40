//! 实体数据模型
//!
//! 知识图谱中的节点。实体携带名称嵌入、别名集合与平行时序列表，
//! 合并时扩展而不是覆盖。

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::temporal::{Observation, Temporal};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// 名称归一化：小写、压缩空白
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 由名称和标签派生稳定的实体 ID
pub fn entity_id(name: &str, label: &str) -> String {
    format!("{}:{}", slug(label), slug(name))
}

fn slug(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let slug = NON_WORD.replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// 实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 实体唯一标识
    pub id: String,

    /// 规范名称
    pub name: String,

    /// 实体类型标签
    pub label: String,

    /// 键值属性
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,

    /// 名称嵌入向量
    #[serde(default)]
    pub embedding: Vec<f32>,

    /// 别名集合（包含规范名称）
    #[serde(default)]
    pub aliases: BTreeSet<String>,

    /// 观察记录
    #[serde(flatten)]
    pub temporal: Temporal,

    /// 合并进来的原始成员，键为 (实体 ID, 名称)；为空时实体自身即唯一成员
    #[serde(skip)]
    pub constituents: BTreeMap<(String, String), Constituent>,
}

/// 合并前的单个实体表示
///
/// 消解在成员之间两两比较（单链接），因此合并结果只取决于成员集合。
#[derive(Debug, Clone, PartialEq)]
pub struct Constituent {
    pub id: String,
    pub label: String,
    /// 归一化后的名称与别名
    pub alias_keys: BTreeSet<String>,
    pub embedding: Vec<f32>,
}

impl Constituent {
    /// 同键成员合并：别名取并集，嵌入与标签取确定性的一方
    fn absorb(&mut self, other: Constituent) {
        self.alias_keys.extend(other.alias_keys);
        if compare_vectors(&other.embedding, &self.embedding) == Ordering::Greater {
            self.embedding = other.embedding;
        }
        if other.label < self.label {
            self.label = other.label;
        }
    }
}

/// 向量的全序比较（逐维 total_cmp，其次长度）
fn compare_vectors(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

impl Entity {
    /// 创建新实体
    pub fn new(name: &str, label: &str) -> Self {
        let name = name.trim().to_string();
        let label = if label.trim().is_empty() {
            "Entity".to_string()
        } else {
            label.trim().to_string()
        };

        let mut aliases = BTreeSet::new();
        aliases.insert(name.clone());

        Self {
            id: entity_id(&name, &label),
            name,
            label,
            properties: HashMap::new(),
            embedding: Vec::new(),
            aliases,
            temporal: Temporal::default(),
            constituents: BTreeMap::new(),
        }
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.temporal.push(observation);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.add_alias(alias);
        self
    }

    /// 添加别名
    pub fn add_alias(&mut self, alias: &str) {
        let alias = alias.trim();
        if !alias.is_empty() {
            self.aliases.insert(alias.to_string());
        }
    }

    /// 观察次数
    pub fn observation_count(&self) -> usize {
        self.temporal.len()
    }

    /// 最早观察时间
    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.temporal.earliest_obs()
    }

    /// 归一化后的名称与别名，用于精确别名匹配
    pub fn alias_keys(&self) -> BTreeSet<String> {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|alias| normalize_name(alias))
            .filter(|alias| !alias.is_empty())
            .collect()
    }

    /// 是否存在共同别名
    pub fn shares_alias_with(&self, other: &Entity) -> bool {
        let keys = self.alias_keys();
        other.alias_keys().iter().any(|key| keys.contains(key))
    }

    /// 成员视图；未合并过的实体以自身为唯一成员
    pub fn constituents(&self) -> Cow<'_, BTreeMap<(String, String), Constituent>> {
        if !self.constituents.is_empty() {
            return Cow::Borrowed(&self.constituents);
        }
        let own = Constituent {
            id: self.id.clone(),
            label: self.label.clone(),
            alias_keys: self.alias_keys(),
            embedding: self.embedding.clone(),
        };
        Cow::Owned(BTreeMap::from([((self.id.clone(), self.name.clone()), own)]))
    }

    /// 合并优先级：最早观察在前，其次 ID、名称、标签字典序最小
    pub fn precedes(&self, other: &Entity) -> bool {
        precedence(self) <= precedence(other)
    }

    /// 合并两个表示同一事物的实体
    ///
    /// 规范 ID、名称、标签取优先级靠前者；别名与成员取并集；时序列表追加；
    /// 属性冲突时优先级靠前者胜出；嵌入取规范成员的嵌入。
    /// 结果与参数顺序及分组方式无关。
    pub fn merge(a: Entity, b: Entity) -> Entity {
        let (first, second) = if a.precedes(&b) { (a, b) } else { (b, a) };

        let mut constituents = first.constituents().into_owned();
        for (key, member) in second.constituents().into_owned() {
            match constituents.get_mut(&key) {
                Some(existing) => existing.absorb(member),
                None => {
                    constituents.insert(key, member);
                }
            }
        }
        let embedding = constituents
            .get(&(first.id.clone(), first.name.clone()))
            .map(|c| c.embedding.clone())
            .unwrap_or_else(|| first.embedding.clone());

        let mut properties = second.properties;
        properties.extend(first.properties);

        let mut aliases = first.aliases;
        aliases.extend(second.aliases);

        let mut temporal = first.temporal;
        temporal.extend(&second.temporal);

        Entity {
            id: first.id,
            name: first.name,
            label: first.label,
            properties,
            embedding,
            aliases,
            temporal,
            constituents,
        }
    }
}

fn precedence(entity: &Entity) -> (DateTime<Utc>, &str, &str, &str) {
    (
        entity.first_seen().unwrap_or(DateTime::<Utc>::MAX_UTC),
        &entity.id,
        &entity.name,
        &entity.label,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("  Alice Smith ", "Person");
        assert_eq!(entity.id, "person:alice_smith");
        assert_eq!(entity.name, "Alice Smith");
        assert!(entity.aliases.contains("Alice Smith"));
        assert_eq!(entity.observation_count(), 0);
    }

    #[test]
    fn test_entity_id_is_stable() {
        assert_eq!(entity_id("Acme Corp.", "Organization"), "organization:acme_corp");
        assert_eq!(entity_id("", ""), "unknown:unknown");
    }

    #[test]
    fn test_alias_matching_is_normalized() {
        let a = Entity::new("Alice", "Person").with_alias("A.  Smith");
        let b = Entity::new("a. smith", "Person");
        assert!(a.shares_alias_with(&b));
        assert!(!a.shares_alias_with(&Entity::new("Bob", "Person")));
    }

    #[test]
    fn test_merge_is_symmetric() {
        let a = Entity::new("Alice", "Person")
            .with_observation(Observation::open(ts(10)))
            .with_embedding(vec![1.0, 0.0]);
        let b = Entity::new("Alice", "Person")
            .with_alias("A. Smith")
            .with_observation(Observation::new(ts(20), ts(20), Some(ts(20))))
            .with_observation(Observation::open(ts(30)))
            .with_embedding(vec![0.0, 1.0]);

        let ab = Entity::merge(a.clone(), b.clone());
        let ba = Entity::merge(b, a);

        assert_eq!(ab, ba);
        assert_eq!(ab.aliases.len(), 2);
        assert_eq!(ab.observation_count(), 3);
        assert_eq!(ab.constituents.len(), 1);
        assert_eq!(ab.embedding, ab.constituents.values().next().unwrap().embedding);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = Entity::new("Acme Corp", "Organization")
            .with_embedding(vec![1.0, 0.0])
            .with_observation(Observation::open(ts(3)));
        let b = Entity::new("Acme", "Organization")
            .with_embedding(vec![0.6, 0.8])
            .with_observation(Observation::open(ts(1)));
        let c = Entity::new("Acme Ltd", "Organization")
            .with_embedding(vec![0.0, 1.0])
            .with_observation(Observation::open(ts(2)));

        let left = Entity::merge(Entity::merge(a.clone(), b.clone()), c.clone());
        let right = Entity::merge(a, Entity::merge(b, c));

        assert_eq!(left, right);
        assert_eq!(left.id, "organization:acme");
        assert_eq!(left.embedding, vec![0.6, 0.8]);
        assert_eq!(left.constituents.len(), 3);
    }

    #[test]
    fn test_merge_precedence_earliest_then_smallest_id() {
        let early = Entity::new("Zed", "Person").with_observation(Observation::open(ts(1)));
        let late = Entity::new("Adam", "Person").with_observation(Observation::open(ts(2)));
        assert_eq!(Entity::merge(late.clone(), early.clone()).id, early.id);

        let a = Entity::new("Adam", "Person").with_observation(Observation::open(ts(5)));
        let z = Entity::new("Zed", "Person").with_observation(Observation::open(ts(5)));
        assert_eq!(Entity::merge(z, a.clone()).id, a.id);
    }

    #[test]
    fn test_merge_property_priority() {
        let mut first = Entity::new("Acme", "Organization").with_observation(Observation::open(ts(1)));
        first.properties.insert("country".into(), serde_json::json!("US"));
        let mut second = Entity::new("Acme", "Organization").with_observation(Observation::open(ts(2)));
        second.properties.insert("country".into(), serde_json::json!("DE"));
        second.properties.insert("founded".into(), serde_json::json!(1999));

        let merged = Entity::merge(second, first);
        assert_eq!(merged.properties["country"], serde_json::json!("US"));
        assert_eq!(merged.properties["founded"], serde_json::json!(1999));
    }

    #[test]
    fn test_entity_serializes_flat_temporal_fields() {
        let entity = Entity::new("Alice", "Person").with_observation(Observation::open(ts(0)));
        let json = serde_json::to_value(&entity).unwrap();
        assert!(json.get("t_obs").is_some());
        assert!(json.get("aliases").is_some());
        assert!(json.get("temporal").is_none());
    }
}
