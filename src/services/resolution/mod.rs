//! 实体与关系消解、并行合并

pub mod entity_resolver;
pub mod merger;
pub mod relation_resolver;
pub mod similarity;

pub use entity_resolver::{EntityResolver, Resolution};
pub use merger::{GraphMerger, MergeStats, ParallelMerger};
pub use relation_resolver::RelationResolver;
