//! 原子事实与文本块

use serde::{Deserialize, Serialize};

/// 外部 chunker 产出的文本块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub text: String,
}

impl TextChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 原子事实：最小的、自包含的事实陈述
///
/// 产出一次，由抽取消费一次，不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomicFact {
    /// `{chunk_id}#{index}`
    pub id: String,
    pub text: String,
    pub source_chunk_id: String,
}

impl AtomicFact {
    pub fn new(source_chunk_id: &str, index: usize, text: &str) -> Self {
        Self {
            id: format!("{}#{}", source_chunk_id, index),
            text: text.trim().to_string(),
            source_chunk_id: source_chunk_id.to_string(),
        }
    }
}

/// 粗略的 token 估计：词数 × 1.3，向上取整
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    (words * 1.3).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_id() {
        let fact = AtomicFact::new("chunk-7", 2, "  Alice is CEO of Acme ");
        assert_eq!(fact.id, "chunk-7#2");
        assert_eq!(fact.text, "Alice is CEO of Acme");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4);
        assert_eq!(estimate_tokens(&"w ".repeat(10)), 13);
    }
}
