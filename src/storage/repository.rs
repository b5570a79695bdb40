//! 存储接口
//!
//! 图存储与社区存储的最小接口。持久化细节（查询语言、schema）属于实现方。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Community, CommunityDelta, Entity, Relationship};

/// 图存储 trait
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// 按 ID 插入或替换实体，返回写入条数
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<usize>;

    /// 按完整关系 ID 插入或替换关系，返回写入条数
    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize>;

    /// 根据 ID 获取实体
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>>;

    /// 获取以该实体为端点的关系
    async fn query_related(&self, id: &str) -> Result<Vec<Relationship>>;
}

/// 社区与增量摘要存储 trait
#[async_trait]
pub trait CommunityStore: Send + Sync {
    /// 根据 ID 获取社区
    async fn get_community(&self, id: &str) -> Result<Option<Community>>;

    /// 插入或替换社区（外部社区检测器调用）
    async fn upsert_community(&self, community: Community) -> Result<()>;

    /// 删除社区，其 delta 成为孤儿
    async fn remove_community(&self, id: &str) -> Result<bool>;

    /// 列出社区
    async fn list_communities(&self) -> Result<Vec<Community>>;

    /// 追加一条 pending delta
    async fn append_delta(&self, delta: CommunityDelta) -> Result<()>;

    /// 按 created_at 升序返回 pending delta
    async fn pending_deltas(&self, community_id: &str) -> Result<Vec<CommunityDelta>>;

    /// 同一时刻的社区与其 pending delta
    async fn read_snapshot(&self, community_id: &str) -> Result<Option<(Community, Vec<CommunityDelta>)>>;

    /// 原子提交一次压缩
    ///
    /// 仅当社区当前的 `last_compacted_at` 等于 `expected_last_compacted` 时生效：写入新的
    /// 基础摘要、更新 `last_compacted_at`、把 `folded` 中的 delta 标记为 compacted。
    /// 否则返回 `AppError::Conflict`，不做任何修改。
    async fn commit_compaction(
        &self,
        community_id: &str,
        new_summary: &str,
        expected_last_compacted: Option<DateTime<Utc>>,
        folded: &[String],
        compacted_at: DateTime<Utc>,
    ) -> Result<Community>;

    /// 拥有 pending delta 的社区 ID（包括已不存在的社区）
    async fn communities_with_pending(&self) -> Result<Vec<String>>;

    /// 删除所属社区已不存在的 delta，返回删除条数
    async fn remove_orphan_deltas(&self) -> Result<usize>;

    /// 删除早于 `older_than` 压缩的 delta，返回删除条数
    async fn cleanup_compacted_deltas(&self, older_than: DateTime<Utc>) -> Result<usize>;
}
