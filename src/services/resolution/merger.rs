//! 并行图合并
//!
//! 二叉树归约：每轮把图两两配对并行合并，直到只剩一张图，共 ⌈log₂ n⌉ 轮。
//! 轮与轮之间是屏障；同一轮内的合并互不依赖。增量更新复用同一个两两合并操作。
//!
//! 实体按单链接聚类（并查集），两张各自已消解的图合并时只需比较跨图的实体对。

use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::AtomConfig;
use crate::error::{AppError, Result};
use crate::models::{Entity, KnowledgeGraph, Relationship};
use crate::services::resolution::entity_resolver::{EntityResolver, Resolution};
use crate::services::resolution::relation_resolver::RelationResolver;

/// 合并统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub input_graphs: usize,
    pub rounds: usize,
    pub entities: usize,
    pub relationships: usize,
}

/// 两两合并，消解只发生在这里
#[derive(Debug, Clone, Default)]
pub struct GraphMerger {
    entity_resolver: EntityResolver,
    relation_resolver: RelationResolver,
}

impl GraphMerger {
    pub fn new(entity_resolver: EntityResolver, relation_resolver: RelationResolver) -> Self {
        Self {
            entity_resolver,
            relation_resolver,
        }
    }

    pub fn from_config(config: &AtomConfig) -> Self {
        Self::new(
            EntityResolver::from_config(config),
            RelationResolver::from_config(config),
        )
    }

    /// 合并两张各自已消解的图
    pub fn merge(&self, a: KnowledgeGraph, b: KnowledgeGraph) -> KnowledgeGraph {
        let (large, small) = order_operands(a, b);
        let boundary = large.entities.len();

        let mut entities = large.entities;
        entities.extend(small.entities);
        let pairs: Vec<(usize, usize)> = (boundary..entities.len())
            .flat_map(|j| (0..boundary).map(move |i| (i, j)))
            .collect();
        let (entities, remap) = self.cluster(entities, pairs);

        let relationships = large.relationships.into_iter().chain(small.relationships);
        self.assemble(entities, relationships, &remap)
    }

    /// 在单张图内部做一次完整消解；原子图进入归约前先经过这里
    pub fn resolve(&self, graph: KnowledgeGraph) -> KnowledgeGraph {
        let KnowledgeGraph {
            entities,
            relationships,
        } = graph;
        let pairs: Vec<(usize, usize)> = (0..entities.len())
            .flat_map(|j| (0..j).map(move |i| (i, j)))
            .collect();
        let (entities, remap) = self.cluster(entities, pairs);
        self.assemble(entities, relationships.into_iter(), &remap)
    }

    /// 对给定实体对做单链接聚类，返回合并后的实体与被合并 ID 到规范 ID 的映射
    fn cluster(
        &self,
        entities: Vec<Entity>,
        pairs: Vec<(usize, usize)>,
    ) -> (Vec<Entity>, HashMap<String, String>) {
        let mut sets = UnionFind::<usize>::new(entities.len());
        for (i, j) in pairs {
            if sets.find(i) != sets.find(j) && self.entity_resolver.related(&entities[i], &entities[j]) {
                sets.union(i, j);
            }
        }

        let mut groups: BTreeMap<usize, Vec<Entity>> = BTreeMap::new();
        for (entity, root) in entities.into_iter().zip(sets.into_labeling()) {
            groups.entry(root).or_default().push(entity);
        }

        let mut remap = HashMap::new();
        let mut merged = Vec::with_capacity(groups.len());
        for mut members in groups.into_values() {
            members.sort_by(entity_precedence);
            let ids: Vec<String> = members.iter().map(|e| e.id.clone()).collect();
            let Some(canonical) = members.into_iter().reduce(Entity::merge) else {
                continue;
            };
            if ids.len() > 1 {
                debug!(canonical = %canonical.id, members = ids.len(), "entities merged");
            }
            for id in ids {
                if id != canonical.id {
                    remap.insert(id, canonical.id.clone());
                }
            }
            merged.push(canonical);
        }
        (merged, remap)
    }

    fn assemble(
        &self,
        entities: Vec<Entity>,
        incoming: impl Iterator<Item = Relationship>,
        remap: &HashMap<String, String>,
    ) -> KnowledgeGraph {
        let mut relationships: Vec<Relationship> = Vec::new();
        for mut relationship in incoming {
            relationship.remap_endpoints(remap);
            match self.relation_resolver.resolve(&relationship, &relationships) {
                Resolution::Merge { index, .. } => {
                    let existing = relationships.swap_remove(index);
                    relationships.push(Relationship::merge(existing, relationship));
                }
                Resolution::Create => relationships.push(relationship),
            }
        }

        KnowledgeGraph::new(entities, relationships).sorted()
    }
}

fn entity_precedence(a: &Entity, b: &Entity) -> Ordering {
    if a.id == b.id {
        Ordering::Equal
    } else if a.precedes(b) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// 实体多者为大图；相同时取最小实体 ID 更小者
fn order_operands(a: KnowledgeGraph, b: KnowledgeGraph) -> (KnowledgeGraph, KnowledgeGraph) {
    let a_first = a.entities.iter().map(|e| e.id.as_str()).min();
    let b_first = b.entities.iter().map(|e| e.id.as_str()).min();
    let a_is_large = match a.entities.len().cmp(&b.entities.len()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a_first <= b_first,
    };
    if a_is_large { (a, b) } else { (b, a) }
}

/// 基于 rayon 线程池的树形归约
pub struct ParallelMerger {
    merger: GraphMerger,
    pool: rayon::ThreadPool,
}

impl ParallelMerger {
    pub fn new(config: &AtomConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.max(1))
            .thread_name(|i| format!("chronokg-merge-{}", i))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build merge pool: {}", e)))?;

        Ok(Self {
            merger: GraphMerger::from_config(config),
            pool,
        })
    }

    /// 把一批原子图归约为一张图
    pub fn merge_all(&self, graphs: Vec<KnowledgeGraph>) -> (KnowledgeGraph, MergeStats) {
        let input_graphs = graphs.len();
        let mut level: Vec<KnowledgeGraph> = graphs.into_iter().filter(|g| !g.is_empty()).collect();
        let mut rounds = 0;
        let merger = &self.merger;

        self.pool.install(|| {
            level = std::mem::take(&mut level)
                .into_par_iter()
                .map(|graph| merger.resolve(graph))
                .collect();
            while level.len() > 1 {
                level = std::mem::take(&mut level)
                    .into_par_iter()
                    .chunks(2)
                    .map(|pair| {
                        let mut pair = pair.into_iter();
                        match (pair.next(), pair.next()) {
                            (Some(a), Some(b)) => merger.merge(a, b),
                            (Some(a), None) => a,
                            _ => KnowledgeGraph::default(),
                        }
                    })
                    .collect();
                rounds += 1;
                debug!(round = rounds, remaining = level.len(), "merge round complete");
            }
        });

        let graph = level.pop().unwrap_or_default().sorted();
        let stats = MergeStats {
            input_graphs,
            rounds,
            entities: graph.entities.len(),
            relationships: graph.relationships.len(),
        };
        info!(
            input_graphs,
            rounds,
            entities = stats.entities,
            relationships = stats.relationships,
            "parallel merge finished"
        );
        (graph, stats)
    }

    /// 增量更新：把新图合并进已有图
    pub fn merge(&self, existing: KnowledgeGraph, new: KnowledgeGraph) -> KnowledgeGraph {
        let merger = &self.merger;
        self.pool.install(|| merger.merge(existing, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Observation;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn fact_graph(subject: &str, object: &str, rel_type: &str, chunk: &str, secs: i64) -> KnowledgeGraph {
        let obs = Observation::open(ts(secs));
        let s = Entity::new(subject, "Person").with_observation(obs);
        let o = Entity::new(object, "Organization").with_observation(obs);
        let rel = Relationship::new(&s.id, &o.id, rel_type, chunk)
            .with_observation(obs)
            .with_atomic_fact(&format!("{}#{}", chunk, secs));
        KnowledgeGraph::new(vec![s, o], vec![rel])
    }

    #[test]
    fn test_merge_is_idempotent() {
        let merger = GraphMerger::default();
        let base = fact_graph("Alice", "Acme", "CEO_OF", "c1", 1);
        let update = fact_graph("Bob", "Acme", "WORKS_AT", "c2", 2);

        let once = merger.merge(base.clone(), update.clone());
        let twice = merger.merge(once.clone(), update);
        assert_eq!(once, twice);
        assert_eq!(once.entities.len(), 3);
        assert_eq!(once.relationships.len(), 2);
    }

    #[test]
    fn test_alias_merge_remaps_relationships() {
        let merger = GraphMerger::default();
        let alice = Entity::new("Alice", "Person")
            .with_alias("A. Smith")
            .with_observation(Observation::open(ts(1)));
        let base = KnowledgeGraph::new(vec![alice], vec![]);

        let update = fact_graph("A. Smith", "Acme", "CEO_OF", "c1", 2);
        let merged = merger.merge(base, update);

        let ids: Vec<&str> = merged.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["organization:acme", "person:alice"]);
        assert_eq!(merged.relationships[0].source_id, "person:alice");
    }

    fn organization(name: &str, degrees: f32, secs: i64) -> KnowledgeGraph {
        let radians = degrees.to_radians();
        let entity = Entity::new(name, "Organization")
            .with_embedding(vec![radians.cos(), radians.sin()])
            .with_observation(Observation::open(ts(secs)));
        KnowledgeGraph::new(vec![entity], vec![])
    }

    #[test]
    fn test_bridge_entity_joins_both_sides_in_any_grouping() {
        // 0° 与 80° 相距太远，40° 与两者都达到阈值
        let merger = GraphMerger::default();
        let a = organization("Acme Corp", 0.0, 1);
        let b = organization("Acme Ltd", 80.0, 2);
        let c = organization("Acme", 40.0, 3);

        let left = merger.merge(merger.merge(a.clone(), b.clone()), c.clone());
        let right = merger.merge(a.clone(), merger.merge(b.clone(), c.clone()));
        let rotated = merger.merge(merger.merge(c, a), b);

        assert_eq!(left, right);
        assert_eq!(left, rotated);
        assert_eq!(left.entities.len(), 1);
        let acme = &left.entities[0];
        assert_eq!(acme.id, "organization:acme_corp");
        let aliases: Vec<&str> = acme.aliases.iter().map(String::as_str).collect();
        assert_eq!(aliases, vec!["Acme", "Acme Corp", "Acme Ltd"]);
    }

    #[test]
    fn test_unbridged_entities_stay_apart() {
        let merger = GraphMerger::default();
        let merged = merger.merge(organization("Acme Corp", 0.0, 1), organization("Acme Ltd", 80.0, 2));
        assert_eq!(merged.entities.len(), 2);
    }

    #[test]
    fn test_resolve_within_single_graph() {
        let merger = GraphMerger::default();
        let mut graph = organization("Acme Corp", 0.0, 1);
        graph.entities.extend(organization("Acme", 10.0, 2).entities);

        let resolved = merger.resolve(graph);
        assert_eq!(resolved.entities.len(), 1);
        assert_eq!(resolved.entities[0].constituents.len(), 2);
    }

    #[test]
    fn test_parallel_merge_rounds() {
        let merger = ParallelMerger::new(&AtomConfig::default()).unwrap();
        let graphs: Vec<KnowledgeGraph> = (0..5)
            .map(|i| fact_graph(&format!("Person {}", i), "Acme", "WORKS_AT", "c1", i))
            .collect();

        let (graph, stats) = merger.merge_all(graphs);
        assert_eq!(stats.input_graphs, 5);
        assert_eq!(stats.rounds, 3);
        // 人物没有嵌入，保持独立；Acme 折叠为一个节点
        assert_eq!(graph.entities.len(), 6);
        assert!(graph.entity("organization:acme").is_some());
        assert_eq!(graph.entities.iter().filter(|e| e.label == "Organization").count(), 1);
    }

    #[test]
    fn test_merge_all_empty_input() {
        let merger = ParallelMerger::new(&AtomConfig::default()).unwrap();
        let (graph, stats) = merger.merge_all(vec![]);
        assert!(graph.is_empty());
        assert_eq!(stats.rounds, 0);
    }
}
