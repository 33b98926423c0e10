//! Embedding provider abstraction.
//!
//! The pipeline embeds all of a document's chunks in one batched call and
//! requires a same-order, same-length response; a count mismatch is fatal
//! for that document. Providers:
//!
//! - **openai** — OpenAI-compatible `POST {base_url}/embeddings` with
//!   retry and exponential backoff (1s, 2s, 4s, ... capped at 32s).
//!   HTTP 429 and 5xx retry; other 4xx fail immediately.
//! - **ollama** — local Ollama `POST {base_url}/api/embed`.
//! - **disabled** — chunks are stored without vectors.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dims(&self) -> usize;
}

pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Box<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" | "ollama" => Ok(Some(Box::new(HttpEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// HTTP-backed embedder covering the OpenAI and Ollama wire formats.
pub struct HttpEmbedder {
    provider: String,
    model: String,
    dims: usize,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
        let base_url = config.base_url.clone().unwrap_or_else(|| {
            match config.provider.as_str() {
                "ollama" => "http://localhost:11434".to_string(),
                _ => "https://api.openai.com/v1".to_string(),
            }
        });
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            provider: config.provider.clone(),
            model,
            dims,
            base_url,
            max_retries: config.max_retries,
            client,
        })
    }

    fn endpoint(&self) -> String {
        match self.provider.as_str() {
            "openai" => format!("{}/embeddings", self.base_url),
            _ => format!("{}/api/embed", self.base_url),
        }
    }

    fn auth_header(&self) -> Result<Option<String>> {
        if self.provider == "openai" {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
            Ok(Some(format!("Bearer {}", api_key)))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint();
        let auth = self.auth_header()?;
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&url).json(&body);
            if let Some(header) = &auth {
                req = req.header("Authorization", header.as_str());
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return match self.provider.as_str() {
                            "openai" => parse_openai_response(&json),
                            _ => parse_ollama_response(&json),
                        };
                    }
                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("embedding API error {}: {}", status, body_text));
                        continue;
                    }
                    // Other client errors: don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing embedding"))?;
        embeddings.push(json_array_to_f32(embedding));
    }
    Ok(embeddings)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing embeddings array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let arr = item
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response: non-array vector"))?;
        embeddings.push(json_array_to_f32(arr));
    }
    Ok(embeddings)
}

fn json_array_to_f32(arr: &[serde_json::Value]) -> Vec<f32> {
    arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let v = vec![1.0f32, -2.5, 3.125];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[test]
    fn parses_openai_shape() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].len(), 2);
    }

    #[test]
    fn parses_ollama_shape() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.6, 0.7]] });
        let out = parse_ollama_response(&json).unwrap();
        assert_eq!(out, vec![vec![0.5f32, 0.6, 0.7]]);
    }

    #[test]
    fn missing_data_is_an_error() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }
}
