//! The embedding seam.
//!
//! The production embedding client (an HTTP call to a provider) is an
//! external collaborator; the core depends only on this trait. The
//! feature-hashing embedder gives deterministic vectors so BM25+vector
//! fusion is exercised end-to-end without a network.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.pop().unwrap_or_default())
    }
}

/// Deterministic feature-hashing embedder: tokens hash into buckets, the
/// vector is L2-normalized. Similar texts share buckets, which is all the
/// ranking pipeline needs.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a, cheap and stable across runs.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        for token in text.split_whitespace() {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ranking::cosine;

    #[tokio::test]
    async fn vectors_are_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("rust async runtime").await.unwrap();
        let b = embedder.embed("rust async runtime").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder.embed("rust tokio async runtime").await.unwrap();
        let close = embedder.embed("tokio async tasks in rust").await.unwrap();
        let far = embedder.embed("gardening tomatoes in spring").await.unwrap();
        assert!(cosine(&base, &close) > cosine(&base, &far));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("one").await.unwrap());
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }
}
