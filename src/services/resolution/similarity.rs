//! 相似度计算

/// 阈值比较容差：分数恰好等于阈值时合并
pub const SCORE_EPSILON: f32 = 1e-6;

/// 余弦相似度；空向量、维度不一致或零向量返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// 标签（类型）是否一致，忽略大小写与首尾空白
pub fn label_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// 分数是否达到阈值
pub fn meets_threshold(score: f32, threshold: f32) -> bool {
    score >= threshold - SCORE_EPSILON
}

/// 两个分数在容差内视为相等
pub fn scores_tie(a: f32, b: f32) -> bool {
    (a - b).abs() <= SCORE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.8, 0.6]) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(meets_threshold(0.8, 0.8));
        assert!(meets_threshold(0.7999999, 0.8));
        assert!(!meets_threshold(0.79, 0.8));
        assert!(label_match(" Person", "person"));
    }
}
