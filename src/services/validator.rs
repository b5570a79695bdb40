//! 写入前一致性校验
//!
//! 每条关系的两个端点都必须出现在同一批写入的实体中。不满足的关系被过滤并计数，
//! 计数与样本通过报告返回给调用方。

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

use crate::config::RelationKeyMode;
use crate::error::AppError;
use crate::models::KnowledgeGraph;

const DEFAULT_SAMPLE_SIZE: usize = 10;

/// 校验报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// 检查的关系数
    pub checked: usize,
    /// 被过滤的关系数
    pub filtered: usize,
    /// 被过滤关系的样本
    pub sample: Vec<String>,
    /// 缺失的实体 ID 样本
    pub missing_entities: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.filtered == 0
    }

    /// 有关系被过滤时给出完整性错误，调用方作为警告上报
    pub fn integrity_error(&self) -> Option<AppError> {
        if self.is_clean() {
            return None;
        }
        Some(AppError::Integrity(format!(
            "{} relationships referenced unknown entities: {}",
            self.filtered,
            self.missing_entities.join(", ")
        )))
    }
}

#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    sample_size: usize,
}

impl Default for ConsistencyValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl ConsistencyValidator {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub fn validate(&self, graph: KnowledgeGraph) -> (KnowledgeGraph, ValidationReport) {
        let KnowledgeGraph {
            entities,
            relationships,
        } = graph;

        let known: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let mut report = ValidationReport {
            checked: relationships.len(),
            ..ValidationReport::default()
        };
        let mut missing = BTreeSet::new();
        let mut kept = Vec::with_capacity(relationships.len());

        for relationship in relationships {
            let source_ok = known.contains(relationship.source_id.as_str());
            let target_ok = known.contains(relationship.target_id.as_str());
            if source_ok && target_ok {
                kept.push(relationship);
                continue;
            }

            report.filtered += 1;
            if report.sample.len() < self.sample_size {
                report.sample.push(relationship.rel_id(RelationKeyMode::Provenance));
            }
            if !source_ok {
                missing.insert(relationship.source_id.clone());
            }
            if !target_ok {
                missing.insert(relationship.target_id.clone());
            }
        }

        report.missing_entities = missing.into_iter().take(self.sample_size).collect();

        if report.filtered > 0 {
            warn!(
                filtered = report.filtered,
                sample = ?report.sample,
                missing = ?report.missing_entities,
                "relationships referencing unknown entities were filtered"
            );
        }

        (KnowledgeGraph::new(entities, kept), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, Relationship};

    #[test]
    fn test_dangling_relation_filtered() {
        let e1 = Entity::new("e1", "Thing");
        let rel_ok = Relationship::new(&e1.id, &e1.id, "SELF", "c1");
        let rel_bad = Relationship::new(&e1.id, "thing:e99", "WORKS_AT", "c1");
        let graph = KnowledgeGraph::new(vec![e1], vec![rel_ok, rel_bad]);

        let (valid, report) = ConsistencyValidator::default().validate(graph);

        assert_eq!(report.filtered, 1);
        assert_eq!(report.checked, 2);
        assert_eq!(report.missing_entities, vec!["thing:e99".to_string()]);
        assert_eq!(valid.relationships.len(), 1);
        assert_eq!(valid.relationships[0].rel_type, "SELF");

        let err = report.integrity_error().unwrap();
        assert_eq!(err.code(), "INTEGRITY");
        assert!(err.to_string().contains("thing:e99"));
    }

    #[test]
    fn test_sample_is_bounded() {
        let e = Entity::new("hub", "Thing");
        let rels = (0..20)
            .map(|i| Relationship::new(&e.id, &format!("thing:missing_{}", i), "LINKS", "c1"))
            .collect();
        let (_, report) = ConsistencyValidator::new(3).validate(KnowledgeGraph::new(vec![e], rels));

        assert_eq!(report.filtered, 20);
        assert_eq!(report.sample.len(), 3);
        assert_eq!(report.missing_entities.len(), 3);
    }

    #[test]
    fn test_clean_graph() {
        let (_, report) = ConsistencyValidator::default().validate(KnowledgeGraph::default());
        assert!(report.is_clean());
        assert!(report.integrity_error().is_none());
    }
}
