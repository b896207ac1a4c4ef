//! Remote HTTP embedding provider (OpenAI-compatible `/embeddings` endpoint).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{MemoryError, Result};

pub struct RemoteApiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl RemoteApiProvider {
    pub fn new(api_key: String, endpoint: String, model: String, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: endpoint.trim_end_matches('/').to_string(),
            model,
            dims,
        }
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/embeddings") {
            self.base_url.clone()
        } else {
            format!("{}/embeddings", self.base_url)
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for RemoteApiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| MemoryError::Provider("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let req = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| MemoryError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MemoryError::Provider(format!(
                "authentication rejected ({status})"
            )));
        }
        if !status.is_success() {
            return Err(MemoryError::Provider(format!(
                "endpoint returned {status}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("unexpected response shape: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(MemoryError::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut out = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            if item.embedding.len() != self.dims {
                return Err(MemoryError::Provider(format!(
                    "expected {} dimensions, got {}",
                    self.dims,
                    item.embedding.len()
                )));
            }
            out.push(item.embedding);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> String {
        format!("remote:{}:{}", self.model, self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(endpoint: &str) -> RemoteApiProvider {
        RemoteApiProvider::new(
            "key".into(),
            endpoint.into(),
            "text-embedding-3-small".into(),
            1536,
        )
    }

    #[test]
    fn endpoint_appends_embeddings_path() {
        assert_eq!(
            provider("https://api.openai.com/v1").endpoint(),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            provider("https://api.openai.com/v1/").endpoint(),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_preserves_explicit_embeddings_url() {
        assert_eq!(
            provider("https://api.example.com/v1/embeddings").endpoint(),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[test]
    fn provider_key_carries_model_and_dims() {
        assert_eq!(
            provider("https://api.openai.com/v1").provider_key(),
            "remote:text-embedding-3-small:1536"
        );
    }

    #[tokio::test]
    async fn empty_batch_skips_network() {
        let p = provider("http://127.0.0.1:1/v1");
        assert!(p.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_provider_failure() {
        let p = provider("http://127.0.0.1:1/v1");
        let err = p.embed("hello").await.unwrap_err();
        assert!(matches!(err, MemoryError::Provider(_)));
    }
}
