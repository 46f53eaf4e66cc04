// ── Recall Engine: Chat-Completion Client ──────────────────────────────────
//
// One client for both external language models: the response generator
// (streaming deltas proxied live to the caller) and the deep extractor
// (JSON-mode, low temperature). Speaks the OpenAI-compatible
// /v1/chat/completions protocol, which local Ollama also serves.

use crate::atoms::error::{EngineError, EngineResult};
use futures::StreamExt;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Self {
        ChatClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req
    }

    /// Parse one SSE data line from an OpenAI-compatible stream into its
    /// content delta, if any.
    fn parse_sse_delta(data: &str) -> Option<String> {
        let v: Value = serde_json::from_str(data).ok()?;
        v["choices"][0]["delta"]["content"].as_str().map(|s| s.to_string())
    }

    /// Stream a chat completion, invoking `on_delta` for every content
    /// chunk as it arrives. Returns the accumulated full reply.
    pub async fn stream_chat<F>(
        &self,
        system: &str,
        user: &str,
        mut on_delta: F,
    ) -> EngineResult<String>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": true,
        });

        info!("[chat] Streaming request to {} model={}", url, self.model);

        let response = self
            .request(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::provider("responder", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "responder",
                format!("API error {}: {}", status, truncate(&text, 200)),
            ));
        }

        let mut full = String::new();
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(result) = byte_stream.next().await {
            let bytes = result.map_err(|e| {
                EngineError::provider("responder", format!("stream read error: {e}"))
            })?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Process complete SSE lines.
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if let Some(data) = line.strip_prefix("data: ") {
                    if data == "[DONE]" {
                        return Ok(full);
                    }
                    if let Some(delta) = Self::parse_sse_delta(data) {
                        full.push_str(&delta);
                        on_delta(&delta);
                    }
                }
            }
        }

        Ok(full)
    }

    /// Non-streaming completion with a JSON-object response format. Used by
    /// the deep extractor; temperature stays at or below 0.1.
    pub async fn complete_json(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> EngineResult<Value> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
            "temperature": temperature.min(0.1),
            "response_format": {"type": "json_object"},
        });

        let response = self
            .request(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::provider("extractor", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "extractor",
                format!("API error {}: {}", status, truncate(&text, 200)),
            ));
        }

        let v: Value = response.json().await?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EngineError::ExtractorParse("no message content in completion".into())
            })?;

        parse_json_content(content)
            .ok_or_else(|| EngineError::ExtractorParse(format!(
                "un-parseable JSON: {}",
                truncate(content, 200)
            )))
    }

    /// Check whether the model server answers at all (3 s timeout).
    pub async fn check_reachable(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        if let Ok(resp) = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).timeout(Duration::from_secs(3)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Parse model output as a JSON object, tolerating markdown code fences.
fn parse_json_content(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }
    // ```json … ``` fences
    let without_fence = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    if let Ok(v) = serde_json::from_str::<Value>(without_fence) {
        if v.is_object() {
            return Some(v);
        }
    }
    // Last resort: the first {...} span in the text.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let v = parse_json_content("{\"should_write\": true}").unwrap();
        assert_eq!(v["should_write"], true);
    }

    #[test]
    fn parses_fenced_json() {
        let v = parse_json_content("```json\n{\"summary\": \"x\"}\n```").unwrap();
        assert_eq!(v["summary"], "x");
    }

    #[test]
    fn parses_embedded_object() {
        let v = parse_json_content("Here you go: {\"a\": 1} hope that helps").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn rejects_non_object() {
        assert!(parse_json_content("[1, 2, 3]").is_none());
        assert!(parse_json_content("not json at all").is_none());
    }

    #[test]
    fn sse_delta_extraction() {
        let data = "{\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}";
        assert_eq!(ChatClient::parse_sse_delta(data).as_deref(), Some("hel"));
        let done = "{\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}";
        assert_eq!(ChatClient::parse_sse_delta(done), None);
    }
}
