//! 实体消解
//!
//! 单链接：两个实体只要各自有一个成员彼此足够相似，就视为同一事物。
//! 相似关系在成员之间两两判定，合并结果因此与合并的分组和先后无关。

use crate::config::AtomConfig;
use crate::models::{Constituent, Entity};
use crate::services::resolution::similarity::{cosine_similarity, label_match, meets_threshold};

/// 消解结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 合并到已有条目（下标与得分）
    Merge { index: usize, score: f32 },
    /// 无匹配，新建
    Create,
}

#[derive(Debug, Clone)]
pub struct EntityResolver {
    threshold: f32,
    name_weight: f32,
    label_weight: f32,
}

impl EntityResolver {
    pub fn new(threshold: f32, name_weight: f32, label_weight: f32) -> Self {
        Self {
            threshold,
            name_weight,
            label_weight,
        }
    }

    pub fn from_config(config: &AtomConfig) -> Self {
        Self::new(
            config.ent_threshold,
            config.entity_name_weight,
            config.entity_label_weight,
        )
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 成员之间的加权相似度：名称相似度 × 名称权重 + 标签一致 × 标签权重
    ///
    /// 共享别名的成员名称相似度记为 1。
    fn member_score(&self, a: &Constituent, b: &Constituent) -> f32 {
        let name_similarity = if a.alias_keys.iter().any(|key| b.alias_keys.contains(key)) {
            1.0
        } else {
            cosine_similarity(&a.embedding, &b.embedding)
        };
        let label_score = if label_match(&a.label, &b.label) { 1.0 } else { 0.0 };
        self.name_weight * name_similarity + self.label_weight * label_score
    }

    /// 两个实体所有成员对中的最高得分
    pub fn score(&self, candidate: &Entity, known: &Entity) -> f32 {
        let left = candidate.constituents();
        let right = known.constituents();
        left.values()
            .flat_map(|a| right.values().map(move |b| (a, b)))
            .map(|(a, b)| self.member_score(a, b))
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// 是否应合并：存在 ID 相同的成员，或最高得分达到阈值
    pub fn related(&self, candidate: &Entity, known: &Entity) -> bool {
        if candidate.id == known.id {
            return true;
        }
        let left = candidate.constituents();
        let right = known.constituents();
        if left.values().any(|a| right.values().any(|b| a.id == b.id)) {
            return true;
        }
        meets_threshold(self.score(candidate, known), self.threshold)
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::from_config(&AtomConfig::default())
    }
}
