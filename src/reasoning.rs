//! Reasoning-service collaborator.
//!
//! Reviewer capabilities send a prompt and get text back; whether that
//! text comes from Gemini, a local model, or a canned fixture is behind
//! [`ReasoningService`]. The production client targets the Generative
//! Language API in strict-JSON response mode.

use async_trait::async_trait;
use std::time::Duration;

/// Prompt-in, text-out contract. May fail or time out; the task runner
/// owns retries and deadlines above this seam.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Model identifier, for logs and reports.
    fn model(&self) -> &str;

    /// Produce a completion for `prompt`.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

// ── Gemini client ────────────────────────────────────────────────

/// [`ReasoningService`] backed by the Google Generative Language API.
pub struct GeminiClient {
    api_key: String,
    model: String,
    endpoint: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            ),
            api_key,
            model,
            request_timeout: Duration::from_secs(120),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let payload = serde_json::json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json"
            }
        });

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("reasoning service error {status}: {body}");
        }

        let body: serde_json::Value = resp.json().await?;
        extract_candidate_text(&body)
    }
}

/// Pull the first candidate's text out of a generateContent response.
fn extract_candidate_text(body: &serde_json::Value) -> anyhow::Result<String> {
    let text = body["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .unwrap_or("")
        .trim();
    if text.is_empty() {
        anyhow::bail!("reasoning service returned an empty candidate");
    }
    Ok(text.to_string())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_candidate_text() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  {\"summary\": \"ok\"}  " }] }
            }]
        });
        assert_eq!(
            extract_candidate_text(&body).unwrap(),
            "{\"summary\": \"ok\"}"
        );
    }

    #[test]
    fn empty_candidate_is_an_error() {
        let body = json!({ "candidates": [] });
        assert!(extract_candidate_text(&body).is_err());
    }

    #[test]
    fn client_endpoint_includes_model() {
        let client = GeminiClient::new("k".into(), "gemini-2.0-flash".into());
        assert_eq!(client.model(), "gemini-2.0-flash");
        assert!(client.endpoint.contains("gemini-2.0-flash:generateContent"));
    }
}
