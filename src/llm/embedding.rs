//! Embedding providers: text in, unit-length vector out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::core::config::{EmbeddingBackend, EmbeddingSettings};
use crate::rag::error::{RagError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Turns text into vectors comparable by squared Euclidean distance.
///
/// The default [`embed_batch`](EmbeddingProvider::embed_batch) calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends with native
/// batching override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Identifier recorded in the index so mismatched rebuilds are visible.
    fn model_id(&self) -> &str;
}

/// Deterministic offline embedder: SHA-256 feature hashing of lowercased
/// word tokens into `dimension` signed buckets.
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_id: format!("hashing-{}", dimension.max(1)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// `POST {base_url}/v1/embeddings` against an OpenAI-compatible server.
pub struct OpenAiCompatibleEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for embedding backend")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailure("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| RagError::EmbeddingFailure(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingFailure(format!(
                "embedding error ({}): {}",
                status, text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| RagError::EmbeddingFailure(format!("invalid response body: {}", e)))?;

        let mut items: Vec<(usize, Vec<f32>)> = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for (position, item) in data.iter().enumerate() {
                if let Some(vals) = item["embedding"].as_array() {
                    let mut vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    normalize(&mut vec);
                    let index = item["index"]
                        .as_u64()
                        .map(|i| i as usize)
                        .unwrap_or(position);
                    items.push((index, vec));
                }
            }
        }
        items.sort_by_key(|(index, _)| *index);

        if items.len() != texts.len() {
            return Err(RagError::EmbeddingFailure(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                items.len()
            )));
        }
        Ok(items.into_iter().map(|(_, v)| v).collect())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Scales `vector` to unit length; zero vectors are left as-is.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Resolves the configured embedding backend once at startup.
pub fn build_embedding_provider(
    settings: &EmbeddingSettings,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match settings.backend {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(settings.dimension)),
        EmbeddingBackend::OpenaiCompatible => {
            let base_url = settings
                .base_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(OPENAI_BASE_URL);
            Arc::new(OpenAiCompatibleEmbedder::new(
                base_url,
                settings.model.clone(),
                settings.api_key.clone(),
                Duration::from_secs(settings.timeout_secs),
            )?)
        }
    };
    tracing::info!(
        "Embedding backend: {} (model={})",
        settings.backend,
        provider.model_id()
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use axum::{routing::post, Json, Router};

    use super::*;

    fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[tokio::test]
    async fn hashing_is_deterministic_and_unit_length() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Rust ownership rules").await.unwrap();
        let b = embedder.embed("rust OWNERSHIP rules!").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_ranks_overlapping_text_closer() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("how do I reset my password").await.unwrap();
        let near = embedder.embed("to reset your password open settings").await.unwrap();
        let far = embedder.embed("quarterly revenue grew in europe").await.unwrap();
        assert!(squared_l2(&query, &near) < squared_l2(&query, &far));
    }

    #[tokio::test]
    async fn blank_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn factory_defaults_to_hashing() {
        let provider = build_embedding_provider(&EmbeddingSettings::default()).unwrap();
        assert_eq!(provider.model_id(), "hashing-384");
    }

    #[tokio::test]
    async fn openai_embeddings_are_reordered_and_normalized() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                let n = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                let data: Vec<Value> = (0..n)
                    .rev()
                    .map(|i| json!({"index": i, "embedding": [3.0 * (i as f64 + 1.0), 4.0]}))
                    .collect();
                Json(json!({ "data": data }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let embedder = OpenAiCompatibleEmbedder::new(
            &format!("http://{}", addr),
            "text-embedding-3-small",
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let vectors = embedder.embed_batch(&["a", "b"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);
        assert!((vectors[0][1] - 0.8).abs() < 1e-6);
        let norm: f32 = vectors[1].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        assert_eq!(embedder.embed("solo").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_backend_is_embedding_failure() {
        let embedder = OpenAiCompatibleEmbedder::new(
            "http://127.0.0.1:9",
            "m",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            embedder.embed("x").await,
            Err(RagError::EmbeddingFailure(_))
        ));
    }
}
