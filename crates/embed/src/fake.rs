//! Deterministic hash-derived embedding provider, installed only in tests.

use crate::EmbeddingProvider;
use async_trait::async_trait;
use ingest_core::error::Result;

pub struct FakeEmbeddingProvider {
    dimension: usize,
}

impl FakeEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for FakeEmbeddingProvider {
    fn default() -> Self {
        Self::new(8)
    }
}

fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    let digest = blake3::hash(text.as_bytes());
    let bytes = digest.as_bytes();
    (0..dimension)
        .map(|i| {
            let b = bytes[i % bytes.len()];
            (b as f32 / 255.0) * 2.0 - 1.0
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dimension)).collect())
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let provider = FakeEmbeddingProvider::new(16);
        let a = provider.embed(&["hello".to_string()]).await.unwrap();
        let b = provider.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_texts_yield_different_vectors() {
        let provider = FakeEmbeddingProvider::new(16);
        let a = provider.embed(&["hello".to_string()]).await.unwrap();
        let b = provider.embed(&["world".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let provider = FakeEmbeddingProvider::new(4);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let out = provider.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 3);
        let individually: Vec<_> = texts
            .iter()
            .map(|t| hash_embed(t, 4))
            .collect();
        assert_eq!(out, individually);
    }
}
