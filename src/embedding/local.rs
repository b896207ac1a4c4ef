//! Local hashing embedding provider.
//!
//! Deterministic and dependency-free: each normalized token is projected
//! into several dimensions by independent hash seeds with signed
//! contributions, then the vector is L2-normalized. The result is not a
//! learned embedding, but token overlap still yields high cosine
//! similarity, which is enough for the bounded corpora this engine serves.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::Result;

/// Independent FNV offset bases, one per projection of each token.
const SEEDS: [u64; 4] = [
    0xcbf2_9ce4_8422_2325,
    0x9ae1_6a3b_2f90_404f,
    0x6c62_272e_07bb_0142,
    0x27d4_eb2f_1656_67c5,
];

const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash-projection embedding provider with a fixed dimension per instance.
pub struct LocalHashProvider {
    dims: usize,
}

impl LocalHashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in normalize_tokens(text) {
            for seed in SEEDS {
                let h = fnv1a(seed, token.as_bytes());
                let dim = (h % self.dims as u64) as usize;
                // parity of the upper bits picks the sign, decorrelated
                // from the dimension choice
                let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                v[dim] += sign;
            }
        }
        l2_normalize(&v)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHashProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> String {
        format!("local:fnv1a:{}", self.dims)
    }
}

/// Lowercase, split on non-alphanumeric boundaries, drop single characters.
fn normalize_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn l2_normalize_unit_norm() {
        let v = vec![3.0, 4.0];
        let normalized = l2_normalize(&v);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_normalize(&v), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn tokens_are_lowercased_and_filtered() {
        let tokens = normalize_tokens("Fix the AUTH-bug, now! x");
        assert_eq!(tokens, vec!["fix", "the", "auth", "bug", "now"]);
    }

    #[tokio::test]
    async fn embed_is_deterministic() {
        let provider = LocalHashProvider::new(256);
        let a = provider.embed("agent session memory").await.unwrap();
        let b = provider.embed("agent session memory").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
    }

    #[tokio::test]
    async fn embed_is_l2_normalized() {
        let provider = LocalHashProvider::new(128);
        let v = provider.embed("normalize this sentence please").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn identical_text_has_unit_similarity() {
        let provider = LocalHashProvider::new(256);
        let a = provider.embed("always run smoke tests before deploy").await.unwrap();
        let b = provider.embed("always run smoke tests before deploy").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn overlapping_text_beats_disjoint_text() {
        let provider = LocalHashProvider::new(256);
        let base = provider.embed("fix the auth bug in middleware").await.unwrap();
        let near = provider.embed("auth bug in the middleware layer").await.unwrap();
        let far = provider.embed("pasta recipe with garlic and olive oil").await.unwrap();

        let sim_near = cosine_similarity(&base, &near);
        let sim_far = cosine_similarity(&base, &far);
        assert!(
            sim_near > sim_far,
            "overlapping tokens should score higher: {sim_near} vs {sim_far}"
        );
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let provider = LocalHashProvider::new(64);
        let v = provider.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
