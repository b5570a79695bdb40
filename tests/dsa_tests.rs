// Integration tests for delta-summary accumulation
//
// Tests cover:
// - Delta creation, read-time merge and compaction round trip
// - Count and token thresholds
// - Concurrent compaction and writes arriving mid-compaction
// - Orphan collection after a community disappears

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use chronokg::config::DsaConfig;
use chronokg::error::Result;
use chronokg::models::{Community, CommunityDelta, CompactionState, Entity, Relationship};
use chronokg::observability::PipelineMetrics;
use chronokg::services::summary::{
    CommunityCompactor, CommunitySummaryService, CompactionOutcome, Summarizer,
};
use chronokg::storage::{CommunityStore, GraphStore, InMemoryStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ============ Fakes ============

/// Deterministic summaries; `fuse` can be slowed down to widen race windows.
#[derive(Default)]
struct FakeSummarizer {
    fuse_delay: Option<Duration>,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize_delta(
        &self,
        _community_id: &str,
        entities: &[Entity],
        _relationships: &[Relationship],
    ) -> Result<String> {
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        Ok(format!("{} joined.", names.join(", ")))
    }

    async fn fuse(&self, base_summary: &str, deltas: &[String]) -> Result<String> {
        if let Some(delay) = self.fuse_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("{} {}", base_summary, deltas.join(" ")).trim().to_string())
    }

    async fn summarize_full(
        &self,
        community_id: &str,
        entities: &[Entity],
        _relationships: &[Relationship],
    ) -> Result<String> {
        Ok(format!("{} has {} members.", community_id, entities.len()))
    }
}

async fn store_with_community() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .upsert_community(Community::new("C1", 0).with_base_summary("Base."))
        .await
        .unwrap();
    store
}

async fn append(store: &InMemoryStore, summary: &str, tokens: u32) {
    store
        .append_delta(CommunityDelta::new("C1", summary, vec![]).with_tokens(tokens))
        .await
        .unwrap();
}

fn compactor(store: Arc<InMemoryStore>, summarizer: FakeSummarizer) -> CommunityCompactor {
    CommunityCompactor::new(
        store,
        Arc::new(summarizer),
        DsaConfig::default(),
        4,
        Arc::new(PipelineMetrics::default()),
    )
}

// ============ Round Trip ============

#[tokio::test]
async fn test_six_deltas_compact_to_zero_pending() {
    let store = store_with_community().await;
    let names = ["Ada", "Ben", "Cy", "Di", "Ed", "Flo"];
    let entities: Vec<Entity> = names.iter().map(|n| Entity::new(n, "Person")).collect();
    store.upsert_entities(&entities).await.unwrap();

    let metrics = Arc::new(PipelineMetrics::default());
    let service = CommunitySummaryService::new(
        DsaConfig::default(),
        store.clone(),
        store.clone(),
        Arc::new(FakeSummarizer::default()),
        4,
        metrics.clone(),
    );

    for entity in &entities {
        let targets = HashMap::from([("C1".to_string(), vec![entity.id.clone()])]);
        let report = service.on_members_added(&targets).await;
        assert_eq!(report.created.len(), 1);
    }
    assert_eq!(store.pending_deltas("C1").await.unwrap().len(), 6);
    assert_eq!(
        service.compactor().state("C1").await.unwrap(),
        CompactionState::CompactionEligible
    );

    let merged = service.read_summary("C1").await.unwrap();
    assert!(merged.starts_with("Base.\n\n[Recent Updates]:\nAda joined.\n"));
    assert!(merged.ends_with("Flo joined."));

    let report = service.compact_all().await;
    assert_eq!(report.compacted, vec!["C1".to_string()]);
    assert!(report.failures.is_empty());

    assert!(store.pending_deltas("C1").await.unwrap().is_empty());
    let community = store.get_community("C1").await.unwrap().unwrap();
    assert!(community.last_compacted_at.is_some());
    assert!(community.base_summary.starts_with("Base. Ada joined."));
    assert_eq!(service.read_summary("C1").await.unwrap(), community.base_summary);
    assert!(metrics.gather().contains("chronokg_compactions_total 1"));
}

#[tokio::test]
async fn test_read_merge_orders_deltas_by_creation() {
    let store = store_with_community().await;
    for (secs, summary) in [(3, "third"), (1, "first"), (2, "second")] {
        store
            .append_delta(
                CommunityDelta::new("C1", summary, vec![])
                    .with_created_at(Utc.timestamp_opt(secs, 0).unwrap()),
            )
            .await
            .unwrap();
    }

    let service = CommunitySummaryService::new(
        DsaConfig::default(),
        store.clone(),
        store.clone(),
        Arc::new(FakeSummarizer::default()),
        1,
        Arc::new(PipelineMetrics::default()),
    );
    assert_eq!(
        service.read_summary("C1").await.unwrap(),
        "Base.\n\n[Recent Updates]:\nfirst\nsecond\nthird"
    );
}

// ============ Thresholds ============

#[tokio::test]
async fn test_token_threshold_triggers_on_fourth_delta() {
    let store = store_with_community().await;
    let compactor = compactor(store.clone(), FakeSummarizer::default());

    for i in 0..3 {
        append(&store, &format!("update {}", i), 300).await;
    }
    // 3 deltas, 900 tokens
    assert_eq!(compactor.state("C1").await.unwrap(), CompactionState::Stable);
    assert_eq!(
        compactor.compact("C1").await.unwrap(),
        CompactionOutcome::NotEligible
    );
    assert_eq!(store.pending_deltas("C1").await.unwrap().len(), 3);

    append(&store, "update 3", 300).await;
    // 4 deltas, 1200 tokens
    match compactor.compact("C1").await.unwrap() {
        CompactionOutcome::Compacted { folded, .. } => assert_eq!(folded, 4),
        other => panic!("expected compaction, got {:?}", other),
    }
    assert!(store.pending_deltas("C1").await.unwrap().is_empty());
    let community = store.get_community("C1").await.unwrap().unwrap();
    assert_eq!(community.base_summary, "Base. update 0 update 1 update 2 update 3");
}

#[tokio::test]
async fn test_token_threshold_is_strict() {
    let store = store_with_community().await;
    let compactor = compactor(store.clone(), FakeSummarizer::default());

    append(&store, "a", 500).await;
    append(&store, "b", 500).await;
    assert_eq!(compactor.state("C1").await.unwrap(), CompactionState::Stable);

    append(&store, "c", 1).await;
    assert_eq!(
        compactor.state("C1").await.unwrap(),
        CompactionState::CompactionEligible
    );
}

// ============ Concurrency ============

#[tokio::test]
async fn test_concurrent_compactions_commit_once() {
    let store = store_with_community().await;
    for i in 0..6 {
        append(&store, &format!("d{}", i), 10).await;
    }
    let slow = || FakeSummarizer {
        fuse_delay: Some(Duration::from_millis(50)),
    };
    let first = compactor(store.clone(), slow());
    let second = compactor(store.clone(), slow());

    let late_writer = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        append(&store, "late", 10).await;
    };
    let (a, b, ()) = tokio::join!(first.compact("C1"), second.compact("C1"), late_writer);

    let outcomes = [a.unwrap(), b.unwrap()];
    let compacted = outcomes
        .iter()
        .filter(|o| matches!(o, CompactionOutcome::Compacted { folded: 6, .. }))
        .count();
    let deferred = outcomes
        .iter()
        .filter(|o| matches!(o, CompactionOutcome::Deferred { .. }))
        .count();
    assert_eq!((compacted, deferred), (1, 1));

    // the delta written mid-compaction stays pending
    let pending = store.pending_deltas("C1").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].summary, "late");
    assert!(
        store
            .read_snapshot("C1")
            .await
            .unwrap()
            .is_some_and(|(community, _)| community.base_summary == "Base. d0 d1 d2 d3 d4 d5")
    );
}

#[tokio::test]
async fn test_removed_community_deltas_are_collected() {
    let store = store_with_community().await;
    for i in 0..6 {
        append(&store, &format!("d{}", i), 10).await;
    }
    store.remove_community("C1").await.unwrap();

    let report = compactor(store.clone(), FakeSummarizer::default())
        .compact_all()
        .await;
    assert_eq!(report.orphans_removed, 6);
    assert!(report.compacted.is_empty());
    assert!(store.all_deltas().is_empty());
}
