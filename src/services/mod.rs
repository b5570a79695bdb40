//! 服务模块

pub mod extraction;
pub mod pipeline;
pub mod resolution;
pub mod summary;
pub mod validator;

pub use extraction::{FactDecomposer, LlmFactDecomposer, LlmTupleExtractor, SentenceDecomposer, TupleExtractor};
pub use pipeline::{IngestPipeline, IngestReport};
pub use resolution::{EntityResolver, GraphMerger, ParallelMerger, RelationResolver};
pub use summary::{CommunityCompactor, CommunitySummaryService, LlmSummarizer, ReadMerger};
pub use validator::{ConsistencyValidator, ValidationReport};
