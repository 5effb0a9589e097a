use async_trait::async_trait;

use crate::error::EmbeddingError;

const DEFAULT_HASH_EMBEDDING_DIMENSIONS: usize = 128;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic offline provider using FNV-1a token hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_EMBEDDING_DIMENSIONS)
    }
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        Ok(embed_text_vector(text, self.dimensions))
    }
}

/// Converts text to a normalized fixed-size vector using FNV-1a token hashing.
pub fn embed_text_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let dimensions = dimensions.max(1);
    let mut vector = vec![0.0f32; dimensions];
    for raw_token in text.split(|character: char| !character.is_alphanumeric()) {
        if raw_token.is_empty() {
            continue;
        }
        let token = raw_token.to_lowercase();
        let hash = fnv1a_hash(token.as_bytes());
        let index = (hash % dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let magnitude = vector
        .iter()
        .map(|component| component * component)
        .sum::<f32>()
        .sqrt();
    if magnitude > 0.0 {
        for component in &mut vector {
            *component /= magnitude;
        }
    }
    vector
}

/// Computes cosine similarity; mismatched lengths score zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot = left
        .iter()
        .zip(right)
        .map(|(left, right)| left * right)
        .sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, embed_text_vector, EmbeddingProvider, HashEmbeddingProvider};
    use crate::error::EmbeddingError;

    #[tokio::test]
    async fn hash_provider_rejects_blank_text() {
        let provider = HashEmbeddingProvider::default();
        let error = provider.embed("   ").await.expect_err("blank text");
        assert_eq!(error, EmbeddingError::EmptyText);
    }

    #[tokio::test]
    async fn hash_provider_is_deterministic_and_normalized() {
        let provider = HashEmbeddingProvider::new(32);
        let first = provider.embed("Lease!").await.expect("embed");
        let second = provider.embed("lease").await.expect("embed");
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
        let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated_text() {
        let query = embed_text_vector("lease renewal", 128);
        let related = embed_text_vector("lease renewal signed today", 128);
        let unrelated = embed_text_vector("quarterly budget review", 128);
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn cosine_similarity_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
