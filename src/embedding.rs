//! Text embedding client
//!
//! Embeds query text for the vector index. The `Embedder` trait is the
//! substitution seam; `OpenAiEmbedder` is the REST implementation.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;

/// Embedding vector for a piece of text.
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            AssistantError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        let values = response_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                AssistantError::Embedding("No embedding in API response".to_string())
            })?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }
}
