use chrono::Utc;
use chronokg::config::ConfigLoader;
use chronokg::config::loader::config_exists;
use chronokg::models::{Community, TextChunk};
use chronokg::observability::{PipelineMetrics, init_tracing};
use chronokg::providers::{
    EmbeddingModel, LanguageModel, RetryPolicy, create_embedding_model, create_language_model,
};
use chronokg::services::{
    CommunitySummaryService, FactDecomposer, IngestPipeline, LlmFactDecomposer, LlmSummarizer,
    LlmTupleExtractor, SentenceDecomposer,
};
use chronokg::storage::{CommunityStore, InMemoryStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::info;

const PARTITION: &str = "default";

/// 按空行切分输入，每段为一个 chunk
fn chunk_input(input: &str) -> Vec<TextChunk> {
    input
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, text)| TextChunk::new(&format!("chunk-{}", i), text))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    ConfigLoader::validate(&config)?;
    let _guard = init_tracing(&config.logging)?;
    info!(
        app = %config.app_name,
        environment = %config.environment,
        backend = %config.provider.backend,
        "configuration loaded"
    );
    if !config_exists() {
        info!("no chronokg.toml found, using defaults and environment");
    }

    let retry = RetryPolicy::from_config(&config.retry);
    let embedder: Arc<dyn EmbeddingModel> = Arc::from(create_embedding_model(&config.provider, retry.clone())?);
    let llm: Arc<dyn LanguageModel> = Arc::from(create_language_model(&config.provider, retry)?);

    let decomposer: Arc<dyn FactDecomposer> = if config.provider.backend == "simple" {
        Arc::new(SentenceDecomposer)
    } else {
        Arc::new(LlmFactDecomposer::new(llm.clone(), config.atom.max_chunk_tokens))
    };
    let extractor = Arc::new(LlmTupleExtractor::new(llm.clone()));
    let store = Arc::new(InMemoryStore::new());
    let metrics = Arc::new(PipelineMetrics::default());

    let pipeline = IngestPipeline::from_config(
        &config,
        decomposer,
        extractor,
        embedder,
        store.clone(),
        metrics.clone(),
    )?;

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let chunks = chunk_input(&input);
    info!(chunks = chunks.len(), "input read");

    let report = pipeline.ingest(PARTITION, &chunks, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let summaries = CommunitySummaryService::new(
        config.dsa.clone(),
        store.clone(),
        store.clone(),
        Arc::new(LlmSummarizer::new(llm)),
        config.atom.max_workers,
        metrics.clone(),
    );
    if store.get_community(PARTITION).await?.is_none() {
        store.upsert_community(Community::new(PARTITION, 0)).await?;
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = summaries.start_background(shutdown_rx);

    if !report.new_entities.is_empty() {
        let targets = HashMap::from([(PARTITION.to_string(), report.new_entities.clone())]);
        let deltas = summaries.on_members_added(&targets).await;
        println!("{}", serde_json::to_string_pretty(&deltas)?);

        let compaction = summaries.compact_all().await;
        println!("{}", serde_json::to_string_pretty(&compaction)?);
    }
    for (community_id, summary) in summaries.read_all().await? {
        println!("[{}]\n{}", community_id, summary);
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = background {
        handle.await?;
    }

    info!(metrics = %metrics.gather(), "done");
    Ok(())
}
