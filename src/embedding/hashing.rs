//! Feature-hashing embedder.
//!
//! Deterministic bag-of-words vectors: each lower-cased alphanumeric token is hashed
//! with FNV-1a into one of `dimensions` buckets with a hash-derived sign, and the
//! result is L2-normalized. No model files; texts sharing words land close together.

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider, ModelLoader};

pub const DEFAULT_HASHING_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIM)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimensions];
        let mut seen = 0usize;
        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
            seen += 1;
        }
        anyhow::ensure!(seen > 0, "text has no tokens to embed");
        Ok(l2_normalize(&v))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Loader for the hashing provider. The model name is informational only.
pub struct HashingModelLoader {
    pub dimensions: usize,
}

impl Default for HashingModelLoader {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIM,
        }
    }
}

impl ModelLoader for HashingModelLoader {
    fn load(&self, model_name: &str) -> Result<Box<dyn EmbeddingProvider>> {
        tracing::debug!(model = %model_name, dimensions = self.dimensions, "using hashing embedder");
        Ok(Box::new(HashingEmbeddingProvider::new(self.dimensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn same_text_same_vector() {
        let p = HashingEmbeddingProvider::default();
        assert_eq!(p.embed("Hello, world").unwrap(), p.embed("hello world").unwrap());
    }

    #[test]
    fn vectors_are_normalized() {
        let p = HashingEmbeddingProvider::new(64);
        let v = p.embed("the quick brown fox").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let p = HashingEmbeddingProvider::default();
        let a = p.embed("rust borrow checker").unwrap();
        let b = p.embed("the borrow checker in rust").unwrap();
        let c = p.embed("baking sourdough bread").unwrap();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn punctuation_only_is_an_error() {
        let p = HashingEmbeddingProvider::default();
        assert!(p.embed("  ...  ").is_err());
    }

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
