//! 存储层模块
//!
//! 图存储与社区存储接口、内存实现，以及带重试的批量写入。

pub mod memory;
pub mod repository;
pub mod writer;

pub use memory::InMemoryStore;
pub use repository::{CommunityStore, GraphStore};
pub use writer::{BatchWriter, WriteReport};
