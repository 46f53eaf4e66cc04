// ── Recall Engine: Embedding Client ────────────────────────────────────────
//
// Calls Ollama or OpenAI-compatible embedding APIs to produce the vector
// representation of a text. Output is L2-normalized so inner product equals
// cosine similarity; a dimension mismatch against the configured D is an
// error rather than a silently wrong vector.
//
// The client is cheap to clone-by-Arc and safe to call from any task; the
// model itself lives behind the HTTP service and is loaded once there.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::store::vector::normalize_embedding;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Health-check timeout for the local model server.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    /// Expected dimension. 0 = learn from the first successful embed.
    dim: std::sync::atomic::AtomicUsize,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str, dim: usize) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim: std::sync::atomic::AtomicUsize::new(dim),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a text. Tries the Ollama API first (current then legacy
    /// endpoint), falls back to the OpenAI-compatible format. The returned
    /// vector is unit-norm.
    pub async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let raw = match self.embed_ollama(text).await {
            Ok(vec) => vec,
            Err(ollama_err) => match self.embed_openai(text).await {
                Ok(vec) => vec,
                Err(openai_err) => {
                    return Err(EngineError::Embedding(format!(
                        "embedding failed. Ollama: {} | OpenAI: {}",
                        ollama_err, openai_err
                    )));
                }
            },
        };

        let expected = self.dim.load(std::sync::atomic::Ordering::Relaxed);
        if expected == 0 {
            self.dim.store(raw.len(), std::sync::atomic::Ordering::Relaxed);
        } else if raw.len() != expected {
            return Err(EngineError::Embedding(format!(
                "model '{}' returned {} dims, expected {}",
                self.model,
                raw.len(),
                expected
            )));
        }

        normalize_embedding(raw).ok_or_else(|| {
            EngineError::Embedding(format!(
                "model '{}' returned a zero-magnitude vector",
                self.model
            ))
        })
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32…]] }
    /// Falls back to legacy: POST /api/embeddings { model, prompt } → { embedding: [f32…] }
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let result = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(60))
            .send()
            .await;

        if let Ok(resp) = result {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(first) = v["embeddings"]
                        .as_array()
                        .and_then(|e| e.first())
                        .and_then(|e| e.as_array())
                    {
                        let vec: Vec<f32> = first
                            .iter()
                            .filter_map(|x| x.as_f64().map(|f| f as f32))
                            .collect();
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                    // Some versions return singular "embedding" on /api/embed.
                    if let Some(embedding) = v["embedding"].as_array() {
                        let vec: Vec<f32> = embedding
                            .iter()
                            .filter_map(|x| x.as_f64().map(|f| f as f32))
                            .collect();
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            }
        }

        // Legacy endpoint.
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "model": self.model, "prompt": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| format!("Ollama not reachable at {}: {}", self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("Ollama embed {} — {}", status, text).into());
        }
        let v: Value = resp.json().await?;
        let embedding = v["embedding"]
            .as_array()
            .ok_or_else(|| "no 'embedding' array in Ollama response".to_string())?;
        let vec: Vec<f32> = embedding
            .iter()
            .filter_map(|x| x.as_f64().map(|f| f as f32))
            .collect();
        if vec.is_empty() {
            return Err("empty embedding vector from Ollama".into());
        }
        Ok(vec)
    }

    /// OpenAI-compatible format: POST /v1/embeddings { model, input }
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("OpenAI embed {} — {}", status, text).into());
        }
        let v: Value = resp.json().await?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "no 'data[0].embedding' array in response".to_string())?;
        let vec: Vec<f32> = embedding
            .iter()
            .filter_map(|x| x.as_f64().map(|f| f as f32))
            .collect();
        if vec.is_empty() {
            return Err("empty embedding vector from OpenAI format".into());
        }
        Ok(vec)
    }

    /// Check if the model server is reachable (3 s timeout).
    pub async fn check_reachable(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Check if the configured model is present in the local server.
    pub async fn check_model_available(&self) -> EngineResult<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err("model server returned an error".into());
        }
        let v: Value = resp.json().await?;
        if let Some(models) = v["models"].as_array() {
            let model_base = self.model.split(':').next().unwrap_or(&self.model);
            for m in models {
                for key in &["name", "model"] {
                    if let Some(name) = m[key].as_str() {
                        let name_base = name.split(':').next().unwrap_or(name);
                        if name_base == model_base || name == self.model {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// Pull the model from Ollama. Blocks until download completes.
    pub async fn pull_model(&self) -> EngineResult<()> {
        let url = format!("{}/api/pull", self.base_url);
        let body = json!({ "name": self.model, "stream": false });
        info!(
            "[memory] Pulling embedding model '{}' (first download may take a while)...",
            self.model
        );
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(600))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("pull failed {} — {}", status, text).into());
        }
        info!("[memory] Model '{}' pull complete", self.model);
        Ok(())
    }

    /// Startup sequence: probe the server, pull the model if missing, run a
    /// test embedding to verify dimensions. Returns the dimension on success.
    pub async fn ensure_ready(&self) -> EngineResult<usize> {
        if !self.check_reachable().await {
            return Err(EngineError::Embedding(format!(
                "embedding server not reachable at {}",
                self.base_url
            )));
        }
        match self.check_model_available().await {
            Ok(true) => {}
            Ok(false) => self.pull_model().await?,
            Err(e) => {
                warn!("[memory] Could not list models ({}), trying a test embed anyway", e);
            }
        }
        let vec = self.embed("embedding readiness probe").await?;
        info!("[memory] ✓ Embedding test passed — {} dimensions", vec.len());
        Ok(vec.len())
    }
}
