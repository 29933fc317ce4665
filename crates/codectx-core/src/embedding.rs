//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for similarity computation.
//!
//! Concrete provider implementations (OpenAI, local hashing) live in the
//! `codectx` app crate.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from vector arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Trait for embedding providers.
///
/// A provider turns text into a fixed-length vector, declares its
/// dimensionality, and prices token usage.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Estimated cost in US dollars of embedding `tokens` tokens.
    fn estimate_cost(&self, tokens: usize) -> f64;

    /// Embed a batch of texts. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            anyhow::bail!(
                "Embedding provider returned {} vectors for 1 input",
                vectors.len()
            );
        }
        Ok(vectors.remove(0))
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value clamped to `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated), or either vector is all zeros
/// - `-1.0` = opposite direction
///
/// Vectors of different lengths are an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0) as f32)
}

/// Scale a vector to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert_eq!(sim, 1.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_bounded() {
        let a = vec![0.3, -7.1, 1e-3, 42.0];
        let b = vec![-0.2, 5.5, 9.0, 0.01];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&sim));
        let scaled: Vec<f32> = a.iter().map(|x| x * 1000.0).collect();
        assert_eq!(cosine_similarity(&a, &scaled).unwrap(), 1.0);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        assert_eq!(sim, 0.0);
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert_eq!(err, VectorError::DimensionMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    struct Fixed;

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        fn estimate_cost(&self, _tokens: usize) -> f64 {
            0.0
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_default_embed_uses_batch() {
        let v = Fixed.embed("abc").await.unwrap();
        assert_eq!(v, vec![3.0, 1.0]);
    }
}
