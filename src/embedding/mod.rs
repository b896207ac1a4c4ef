//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait and two implementations: a
//! deterministic local hashing provider (no network, no model files) and a
//! remote HTTP provider. Providers are created via [`create_provider`] from
//! configuration; all embeddings in one index must come from the same
//! provider, which is why the store records [`EmbeddingProvider::provider_key`].

pub mod local;
pub mod remote;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::Result;

/// Trait for embedding text into L2-normalized vectors of a fixed dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for
    /// batched requests.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Stable identity string recorded alongside the index. Vectors from
    /// different keys live in incompatible spaces.
    fn provider_key(&self) -> String;
}

/// The closed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Remote,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown embedding provider: {other}")),
        }
    }
}

/// Create an embedding provider from config.
///
/// A remote selection without an API key falls back to the local provider
/// with a warning rather than failing: recall availability beats embedding
/// fidelity. Unknown provider names fall back the same way.
pub fn create_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    let kind = match ProviderKind::from_str(&config.provider) {
        Ok(kind) => kind,
        Err(reason) => {
            warn!(%reason, "falling back to local embedding provider");
            ProviderKind::Local
        }
    };

    match kind {
        ProviderKind::Local => Arc::new(local::LocalHashProvider::new(config.dimensions)),
        ProviderKind::Remote => match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => Arc::new(remote::RemoteApiProvider::new(
                key.to_string(),
                config.endpoint.clone(),
                config.model.clone(),
                config.dimensions,
            )),
            _ => {
                warn!("remote embedding provider selected but no API key configured, using local");
                Arc::new(local::LocalHashProvider::new(config.dimensions))
            }
        },
    }
}

/// Cosine similarity between two vectors. Zero for mismatched lengths or
/// zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
