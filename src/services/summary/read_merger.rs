//! 读时合并：基础摘要加上 pending delta

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::CommunityDelta;
use crate::storage::CommunityStore;

pub const RECENT_UPDATES_HEADER: &str = "\n\n[Recent Updates]:\n";

/// 无 delta 时原样返回基础摘要，否则为基础摘要、标题，再逐行列出 delta
pub fn merge_summaries(base: &str, deltas: &[CommunityDelta]) -> String {
    if deltas.is_empty() {
        return base.to_string();
    }
    let updates: Vec<&str> = deltas.iter().map(|d| d.summary.as_str()).collect();
    format!("{}{}{}", base, RECENT_UPDATES_HEADER, updates.join("\n"))
}

pub struct ReadMerger {
    store: Arc<dyn CommunityStore>,
}

impl ReadMerger {
    pub fn new(store: Arc<dyn CommunityStore>) -> Self {
        Self { store }
    }

    pub async fn read(&self, community_id: &str) -> Result<String> {
        let (community, deltas) = self
            .store
            .read_snapshot(community_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("community {}", community_id)))?;
        Ok(merge_summaries(&community.base_summary, &deltas))
    }
}
