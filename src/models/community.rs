//! 社区与增量摘要模型
//!
//! 社区身份由外部社区检测器创建；摘要字段由 DSA 维护。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::atomic_fact::estimate_tokens;

/// 社区
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    /// 外部社区 ID
    pub id: String,

    /// 层级
    pub level: u32,

    /// 基础摘要
    #[serde(default)]
    pub base_summary: String,

    /// 基础摘要 token 数
    #[serde(default)]
    pub summary_tokens: u32,

    /// 最近一次压缩时间
    pub last_compacted_at: Option<DateTime<Utc>>,

    /// 成员实体 ID
    #[serde(default)]
    pub members: Vec<String>,
}

impl Community {
    pub fn new(id: &str, level: u32) -> Self {
        Self {
            id: id.to_string(),
            level,
            base_summary: String::new(),
            summary_tokens: 0,
            last_compacted_at: None,
            members: Vec::new(),
        }
    }

    pub fn with_members(mut self, members: Vec<String>) -> Self {
        self.members = members;
        self
    }

    pub fn with_base_summary(mut self, summary: &str) -> Self {
        self.set_base_summary(summary);
        self
    }

    pub fn set_base_summary(&mut self, summary: &str) {
        self.base_summary = summary.to_string();
        self.summary_tokens = estimate_tokens(summary);
    }
}

/// 增量状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaStatus {
    Pending,
    Compacted,
}

/// 增量摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityDelta {
    /// `{community_id}::delta_{8 位 uuid}`
    pub id: String,
    pub community_id: String,
    pub summary: String,
    pub summary_tokens: u32,
    pub related_entities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: DeltaStatus,
    pub compacted_at: Option<DateTime<Utc>>,
}

impl CommunityDelta {
    pub fn new(community_id: &str, summary: &str, related_entities: Vec<String>) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}::delta_{}", community_id, &short[..8]),
            community_id: community_id.to_string(),
            summary: summary.trim().to_string(),
            summary_tokens: estimate_tokens(summary),
            related_entities,
            created_at: Utc::now(),
            status: DeltaStatus::Pending,
            compacted_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 覆盖估算的 token 数
    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.summary_tokens = tokens;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeltaStatus::Pending
    }
}

/// 社区压缩状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionState {
    Stable,
    CompactionEligible,
    Compacting,
}
