//! 知识图谱
//!
//! 每个原子事实产出一张小图，合并产出同形状的大图；合并是对此类型的折叠。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::RelationKeyMode;
use crate::models::entity::Entity;
use crate::models::relationship::Relationship;

/// 知识图谱
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// 实体列表
    pub entities: Vec<Entity>,
    /// 关系列表
    pub relationships: Vec<Relationship>,
}

/// 图统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub total_aliases: usize,
    pub current_relationships: usize,
}

impl KnowledgeGraph {
    pub fn new(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Self {
        Self {
            entities,
            relationships,
        }
    }

    /// 检查图谱是否为空
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entity_ids(&self) -> HashSet<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }

    /// 按名称或别名查找实体
    pub fn find_by_alias(&self, alias: &str) -> Option<&Entity> {
        let key = crate::models::entity::normalize_name(alias);
        self.entities.iter().find(|e| e.alias_keys().contains(&key))
    }

    pub fn relationships_of(&self, entity_id: &str) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.source_id == entity_id || r.target_id == entity_id)
            .collect()
    }

    /// 规范化排序：实体按 ID，关系按完整关系 ID
    pub fn sorted(mut self) -> Self {
        self.entities.sort_by(|a, b| a.id.cmp(&b.id));
        self.relationships.sort_by_cached_key(|r| r.rel_id(RelationKeyMode::Provenance));
        self
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            total_entities: self.entities.len(),
            total_relationships: self.relationships.len(),
            total_aliases: self.entities.iter().map(|e| e.aliases.len()).sum(),
            current_relationships: self.relationships.iter().filter(|r| r.is_current()).count(),
        }
    }
}
