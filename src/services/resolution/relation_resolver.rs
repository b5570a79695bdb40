//! 关系消解
//!
//! 端点已经过实体消解规范化之后，在同一对端点（以及来源模式下同一 chunk）的
//! 已知关系中寻找语义相同的关系。

use tracing::debug;

use crate::config::{AtomConfig, RelationKeyMode};
use crate::models::Relationship;
use crate::services::resolution::entity_resolver::Resolution;
use crate::services::resolution::similarity::{cosine_similarity, meets_threshold, scores_tie};

#[derive(Debug, Clone)]
pub struct RelationResolver {
    threshold: f32,
    key_mode: RelationKeyMode,
}

impl RelationResolver {
    pub fn new(threshold: f32, key_mode: RelationKeyMode) -> Self {
        Self {
            threshold,
            key_mode,
        }
    }

    pub fn from_config(config: &AtomConfig) -> Self {
        Self::new(config.rel_threshold, config.relation_key)
    }

    pub fn key_mode(&self) -> RelationKeyMode {
        self.key_mode
    }

    /// 两条关系是否可以互为候选
    fn is_candidate(&self, candidate: &Relationship, known: &Relationship) -> bool {
        if candidate.endpoints() != known.endpoints() {
            return false;
        }
        match self.key_mode {
            RelationKeyMode::Endpoints => true,
            RelationKeyMode::Provenance => candidate.source_chunk_id == known.source_chunk_id,
        }
    }

    /// 类型一致记 1，否则取类型嵌入的余弦相似度
    pub fn score(&self, candidate: &Relationship, known: &Relationship) -> f32 {
        if candidate.rel_type == known.rel_type {
            1.0
        } else {
            cosine_similarity(&candidate.embedding, &known.embedding)
        }
    }

    pub fn resolve(&self, candidate: &Relationship, known: &[Relationship]) -> Resolution {
        let mut best: Option<(usize, f32)> = None;

        for (index, existing) in known.iter().enumerate() {
            if !self.is_candidate(candidate, existing) {
                continue;
            }
            let score = self.score(candidate, existing);
            if !meets_threshold(score, self.threshold) {
                continue;
            }
            best = match best {
                Some((current, current_score))
                    if score < current_score
                        || (scores_tie(score, current_score)
                            && !existing.precedes(&known[current])) =>
                {
                    Some((current, current_score))
                }
                _ => Some((index, score)),
            };
        }

        match best {
            Some((index, score)) => {
                debug!(
                    candidate = %candidate.rel_id(self.key_mode),
                    canonical = %known[index].rel_id(self.key_mode),
                    score,
                    "relation resolved to existing edge"
                );
                Resolution::Merge { index, score }
            }
            None => Resolution::Create,
        }
    }
}

impl Default for RelationResolver {
    fn default() -> Self {
        Self::from_config(&AtomConfig::default())
    }
}
