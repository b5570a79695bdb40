//! 原子事实分解
//!
//! 把一个有界文本块拆成有序的原子事实列表。空块或无法解析的 LLM 输出得到零个事实，
//! 不视为错误。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{AtomicFact, TextChunk, estimate_tokens};
use crate::providers::LanguageModel;
use crate::providers::llm::strip_code_fence;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?。！？]+(?:[.!?。！？]+|$)").expect("valid regex"));
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s+").expect("valid regex"));

#[async_trait]
pub trait FactDecomposer: Send + Sync {
    async fn decompose(&self, chunk: &TextChunk) -> Result<Vec<AtomicFact>>;
}

/// 按句子切分
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_END
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// 把超出 token 上限的文本按句子边界切成多个窗口
pub fn split_to_budget(text: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1) as u32;
    let mut windows = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let candidate = if current.is_empty() {
            sentence.clone()
        } else {
            format!("{} {}", current, sentence)
        };
        if estimate_tokens(&candidate) > max_tokens && !current.is_empty() {
            windows.push(std::mem::take(&mut current));
            current = sentence;
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

/// 确定性的句子级分解器，不依赖 LLM
#[derive(Debug, Clone, Default)]
pub struct SentenceDecomposer;

#[async_trait]
impl FactDecomposer for SentenceDecomposer {
    async fn decompose(&self, chunk: &TextChunk) -> Result<Vec<AtomicFact>> {
        Ok(split_sentences(&chunk.text)
            .iter()
            .enumerate()
            .map(|(i, sentence)| AtomicFact::new(&chunk.id, i, sentence))
            .collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FactPayload {
    List(Vec<String>),
    Wrapped { facts: Vec<String> },
}

/// LLM 驱动的分解器
pub struct LlmFactDecomposer {
    llm: Arc<dyn LanguageModel>,
    max_chunk_tokens: usize,
}

impl LlmFactDecomposer {
    pub fn new(llm: Arc<dyn LanguageModel>, max_chunk_tokens: usize) -> Self {
        Self {
            llm,
            max_chunk_tokens,
        }
    }

    fn prompt(text: &str) -> String {
        format!(
            "Decompose the following text into atomic facts. Each fact must be a short, \
             self-contained statement that names its subject explicitly. Keep temporal \
             expressions. Return a JSON array of strings and nothing else.\n\nText:\n{}",
            text
        )
    }

    /// 解析 JSON 数组；失败时退回按行解析
    pub fn parse_facts(raw: &str) -> Vec<String> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Vec::new();
        }

        let json_slice = match (body.find(['[', '{']), body.rfind([']', '}'])) {
            (Some(start), Some(end)) if end > start => &body[start..=end],
            _ => body,
        };
        if let Ok(payload) = serde_json::from_str::<FactPayload>(json_slice) {
            let facts = match payload {
                FactPayload::List(facts) | FactPayload::Wrapped { facts } => facts,
            };
            return facts
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        // 退回按行解析时，只接受每一行都是列表项的输出
        let lines: Vec<&str> = body.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
        if lines.is_empty() || !lines.iter().all(|line| LIST_ITEM.is_match(line)) {
            warn!("decomposition output is neither JSON nor a list, no facts taken");
            return Vec::new();
        }
        lines
            .into_iter()
            .map(|line| LIST_ITEM.replace(line, "").trim().to_string())
            .filter(|line| line.chars().any(|c| c.is_alphanumeric()))
            .collect()
    }
}

#[async_trait]
impl FactDecomposer for LlmFactDecomposer {
    async fn decompose(&self, chunk: &TextChunk) -> Result<Vec<AtomicFact>> {
        if chunk.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let windows = if estimate_tokens(&chunk.text) as usize > self.max_chunk_tokens {
            warn!(
                chunk = %chunk.id,
                max_tokens = self.max_chunk_tokens,
                "chunk exceeds token budget, splitting at sentence boundaries"
            );
            split_to_budget(&chunk.text, self.max_chunk_tokens)
        } else {
            vec![chunk.text.clone()]
        };

        let mut facts = Vec::new();
        for window in windows {
            let raw = self.llm.complete(&Self::prompt(&window)).await?;
            let parsed = Self::parse_facts(&raw);
            if parsed.is_empty() {
                warn!(chunk = %chunk.id, "decomposition produced no facts");
            }
            for text in parsed {
                facts.push(AtomicFact::new(&chunk.id, facts.len(), &text));
            }
        }

        debug!(chunk = %chunk.id, facts = facts.len(), "chunk decomposed");
        Ok(facts)
    }
}
