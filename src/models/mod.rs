//! 核心数据模型模块
//!
//! 定义时序知识图谱的数据结构：AtomicFact, Entity, Relationship, KnowledgeGraph，
//! 以及社区摘要增量模型：Community, CommunityDelta。

pub mod atomic_fact;
pub mod community;
pub mod entity;
pub mod knowledge_graph;
pub mod relationship;
pub mod temporal;

pub use atomic_fact::{AtomicFact, TextChunk, estimate_tokens};
pub use community::{Community, CommunityDelta, CompactionState, DeltaStatus};
pub use entity::{Constituent, Entity, entity_id, normalize_name};
pub use knowledge_graph::{GraphStats, KnowledgeGraph};
pub use relationship::{Relationship, sanitize_relation_type};
pub use temporal::{Observation, Temporal};
