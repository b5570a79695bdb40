//! 原子事实分解与五元组抽取

pub mod decomposer;
pub mod tuple_extractor;

pub use decomposer::{FactDecomposer, LlmFactDecomposer, SentenceDecomposer};
pub use tuple_extractor::{
    EntityMention, ExtractionReport, Extractor, LlmTupleExtractor, Quintuple, TupleExtractor,
};
