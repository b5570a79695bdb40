//! 内存存储
//!
//! 实现 `GraphStore` 与 `CommunityStore`。图数据放在 DashMap 中；社区与 delta 共用一把锁，
//! 使压缩提交与快照读取对读者而言是原子的。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::config::RelationKeyMode;
use crate::error::{AppError, Result};
use crate::models::{Community, CommunityDelta, DeltaStatus, Entity, Relationship};
use crate::storage::repository::{CommunityStore, GraphStore};

#[derive(Default)]
struct CommunityState {
    communities: HashMap<String, Community>,
    deltas: HashMap<String, CommunityDelta>,
}

impl CommunityState {
    fn pending_for(&self, community_id: &str) -> Vec<CommunityDelta> {
        let mut pending: Vec<CommunityDelta> = self
            .deltas
            .values()
            .filter(|d| d.community_id == community_id && d.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    entities: DashMap<String, Entity>,
    relationships: DashMap<String, Relationship>,
    state: RwLock<CommunityState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// 所有 delta（含已压缩），按创建时间排序
    pub fn all_deltas(&self) -> Vec<CommunityDelta> {
        let state = self.state.read();
        let mut deltas: Vec<CommunityDelta> = state.deltas.values().cloned().collect();
        deltas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        deltas
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<usize> {
        for entity in entities {
            self.entities.insert(entity.id.clone(), entity.clone());
        }
        debug!(count = entities.len(), "entities upserted");
        Ok(entities.len())
    }

    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize> {
        for relationship in relationships {
            self.relationships
                .insert(relationship.rel_id(RelationKeyMode::Provenance), relationship.clone());
        }
        debug!(count = relationships.len(), "relationships upserted");
        Ok(relationships.len())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.get(id).map(|e| e.value().clone()))
    }

    async fn query_related(&self, id: &str) -> Result<Vec<Relationship>> {
        let mut related: Vec<Relationship> = self
            .relationships
            .iter()
            .filter(|r| r.source_id == id || r.target_id == id)
            .map(|r| r.value().clone())
            .collect();
        related.sort_by_cached_key(|r| r.rel_id(RelationKeyMode::Provenance));
        Ok(related)
    }
}

#[async_trait]
impl CommunityStore for InMemoryStore {
    async fn get_community(&self, id: &str) -> Result<Option<Community>> {
        Ok(self.state.read().communities.get(id).cloned())
    }

    async fn upsert_community(&self, community: Community) -> Result<()> {
        self.state
            .write()
            .communities
            .insert(community.id.clone(), community);
        Ok(())
    }

    async fn remove_community(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().communities.remove(id).is_some())
    }

    async fn list_communities(&self) -> Result<Vec<Community>> {
        let state = self.state.read();
        let mut communities: Vec<Community> = state.communities.values().cloned().collect();
        communities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(communities)
    }

    async fn append_delta(&self, delta: CommunityDelta) -> Result<()> {
        let mut state = self.state.write();
        if state.deltas.contains_key(&delta.id) {
            return Err(AppError::Conflict(format!("delta {} already exists", delta.id)));
        }
        state.deltas.insert(delta.id.clone(), delta);
        Ok(())
    }

    async fn pending_deltas(&self, community_id: &str) -> Result<Vec<CommunityDelta>> {
        Ok(self.state.read().pending_for(community_id))
    }

    async fn read_snapshot(&self, community_id: &str) -> Result<Option<(Community, Vec<CommunityDelta>)>> {
        let state = self.state.read();
        Ok(state
            .communities
            .get(community_id)
            .map(|community| (community.clone(), state.pending_for(community_id))))
    }

    async fn commit_compaction(
        &self,
        community_id: &str,
        new_summary: &str,
        expected_last_compacted: Option<DateTime<Utc>>,
        folded: &[String],
        compacted_at: DateTime<Utc>,
    ) -> Result<Community> {
        let mut state = self.state.write();

        let current = state
            .communities
            .get(community_id)
            .ok_or_else(|| AppError::NotFound(format!("community {}", community_id)))?;
        if current.last_compacted_at != expected_last_compacted {
            return Err(AppError::Conflict(format!(
                "community {} was compacted concurrently",
                community_id
            )));
        }

        let folded: BTreeSet<&String> = folded.iter().collect();
        for delta in state.deltas.values_mut() {
            if delta.community_id == community_id && delta.is_pending() && folded.contains(&delta.id) {
                delta.status = DeltaStatus::Compacted;
                delta.compacted_at = Some(compacted_at);
            }
        }

        let community = state
            .communities
            .get_mut(community_id)
            .ok_or_else(|| AppError::NotFound(format!("community {}", community_id)))?;
        community.set_base_summary(new_summary);
        community.last_compacted_at = Some(compacted_at);

        info!(community = community_id, folded = folded.len(), "compaction committed");
        Ok(community.clone())
    }

    async fn communities_with_pending(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        let ids: BTreeSet<String> = state
            .deltas
            .values()
            .filter(|d| d.is_pending())
            .map(|d| d.community_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn remove_orphan_deltas(&self) -> Result<usize> {
        let mut state = self.state.write();
        let CommunityState {
            communities,
            deltas,
        } = &mut *state;
        let before = deltas.len();
        deltas.retain(|_, delta| communities.contains_key(&delta.community_id));
        Ok(before - deltas.len())
    }

    async fn cleanup_compacted_deltas(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write();
        let before = state.deltas.len();
        state.deltas.retain(|_, delta| {
            !(delta.status == DeltaStatus::Compacted
                && delta.compacted_at.is_some_and(|at| at < older_than))
        });
        Ok(before - state.deltas.len())
    }
}
