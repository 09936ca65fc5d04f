//! Embedding capability.
//!
//! The engine treats embedding generation as an external capability behind
//! the [`EmbeddingProvider`] trait: an OpenAI-compatible implementation for
//! real deployments and a deterministic hashed implementation for
//! development, gated by an explicit flag.

mod hashed;
mod openai;

pub use hashed::HashedEmbedder;
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::EmbeddingError;

/// Provenance tag stamped into document metadata for hashed vectors.
pub const HASHED_PROVENANCE: &str = "hashed-dev";

/// Trait for embedding backends.
///
/// Implementations must be thread-safe; batch calls preserve input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model name recorded into document metadata.
    fn model_name(&self) -> &str;

    /// Embedding dimension.
    fn dimensions(&self) -> usize;

    /// Provenance tag, when the vectors are not produced by a real model.
    fn provenance(&self) -> Option<&'static str> {
        None
    }

    /// Embeds a batch of texts, one vector per text, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or returns a mismatched count.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            got: 0,
            expected: 1,
        })
    }
}

/// Creates the embedding backend for the given settings.
///
/// Prefers the OpenAI-compatible backend when an API key is configured;
/// falls back to the hashed embedder only when `dev_embeddings` is
/// explicitly enabled.
///
/// # Errors
///
/// Returns [`EmbeddingError::NoBackend`] when neither is available.
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    if let Some(key) = &settings.openai_api_key {
        return Ok(Arc::new(OpenAiEmbedder::new(
            key,
            settings.openai_base_url.as_deref(),
            &settings.embeddings_model,
            settings.embeddings_dim,
            settings.llm_timeout,
        )));
    }
    if settings.dev_embeddings {
        return Ok(Arc::new(HashedEmbedder::new(settings.embeddings_dim)));
    }
    Err(EmbeddingError::NoBackend)
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical), or 0.0 for
/// mismatched lengths or zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_create_embedder_requires_backend() {
        let settings = Settings::default();
        assert!(matches!(
            create_embedder(&settings),
            Err(EmbeddingError::NoBackend)
        ));
    }

    #[test]
    fn test_create_embedder_dev_fallback() {
        let settings = Settings {
            dev_embeddings: true,
            ..Settings::default()
        };
        let embedder = create_embedder(&settings).unwrap();
        assert_eq!(embedder.dimensions(), 1536);
        assert_eq!(embedder.provenance(), Some(HASHED_PROVENANCE));
    }
}
