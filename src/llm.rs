//! Language model clients.
//!
//! Two client flavors share the `LanguageModel` trait: `OllamaClient` for
//! the locally-hosted model that performs extraction and synthesis, and
//! `CloudChatClient` for the OpenAI-compatible polish tiers. The pipeline
//! only ever sees the trait, so tests mock it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, RepriseError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and return the raw model text.
    ///
    /// `json_format` asks the endpoint for JSON-constrained output where the
    /// protocol supports it; callers must still parse defensively.
    async fn generate(&self, prompt: &str, json_format: bool) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaResponse {
    response: String,
    #[allow(dead_code)]
    done: bool,
}

/// Client for a locally-hosted Ollama endpoint.
///
/// JSON-constrained calls are the per-chunk extractions and get the tighter
/// timeout; free-prose calls are the long-form synthesis passes.
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    extract_timeout: Duration,
    synthesis_timeout: Duration,
    pacer: Option<RequestPacer>,
}

impl OllamaClient {
    pub fn new(
        endpoint: String,
        model: String,
        extract_timeout: Duration,
        synthesis_timeout: Duration,
        min_request_interval: Option<Duration>,
    ) -> Result<Self> {
        let client = Client::builder().build().map_err(RepriseError::Http)?;

        Ok(Self {
            client,
            endpoint,
            model,
            extract_timeout,
            synthesis_timeout,
            pacer: min_request_interval.map(RequestPacer::new),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str, json_format: bool) -> Result<String> {
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: json_format.then(|| "json".to_string()),
        };

        let timeout = if json_format {
            self.extract_timeout
        } else {
            self.synthesis_timeout
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!("Sending generation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| RepriseError::Model(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepriseError::Model(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| RepriseError::Model(format!("Failed to parse response: {}", e)))?;

        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(RepriseError::Model("Empty model response".to_string()));
        }

        Ok(text)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct CloudChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl CloudChatClient {
    pub fn new(endpoint: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RepriseError::Http)?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LanguageModel for CloudChatClient {
    async fn generate(&self, prompt: &str, _json_format: bool) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.3,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        debug!("Sending chat request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RepriseError::Model(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepriseError::Model(format!(
                "Chat API error {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RepriseError::Model(format!("Failed to parse response: {}", e)))?;

        let text = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(RepriseError::Model("Empty model response".to_string()));
        }

        Ok(text)
    }
}

/// Best-effort, per-instance spacing between requests. Not cross-process safe.
struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Remove markdown code fences wrapping a response.
///
/// The length guards keep the opening and closing fences from overlapping:
/// a response of bare backticks must fall through, not slice out of bounds.
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();

    if text.len() >= 10 && text.starts_with("```json") && text.ends_with("```") {
        return text[7..text.len() - 3].trim().to_string();
    }
    if text.len() >= 6 && text.starts_with("```") && text.ends_with("```") {
        return text[3..text.len() - 3].trim().to_string();
    }
    if text.len() >= 2 && text.starts_with('`') && text.ends_with('`') {
        return text[1..text.len() - 1].trim().to_string();
    }

    text.to_string()
}

/// Recover the first well-formed JSON object span from mixed text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences_json() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_code_fences_tolerates_bare_fences() {
        // Responses of nothing but backticks must not slice out of bounds.
        for degenerate in ["`", "``", "```", "````", "`````", "``````"] {
            let _ = strip_code_fences(degenerate);
        }
        assert_eq!(strip_code_fences("``````"), "");
        assert_eq!(strip_code_fences("```json```"), "");
        assert_eq!(strip_code_fences("```json"), "```json");
    }

    #[test]
    fn test_extract_json_object_from_mixed_text() {
        let text = "Here are the facts:\n{\"events\": []}\nHope that helps!";
        assert_eq!(extract_json_object(text), Some("{\"events\": []}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[tokio::test]
    async fn test_extraction_calls_use_the_tighter_timeout() {
        // A server that accepts and never answers: the JSON-constrained call
        // must give up at the extraction timeout, well inside the synthesis
        // bound.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = OllamaClient::new(
            format!("http://{}", addr),
            "test-model".to_string(),
            Duration::from_millis(100),
            Duration::from_secs(30),
            None,
        )
        .unwrap();

        let start = Instant::now();
        let result = client.generate("extract facts", true).await;
        assert!(matches!(result, Err(RepriseError::Model(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[tokio::test]
    async fn test_request_pacer_spaces_calls() {
        let pacer = RequestPacer::new(Duration::from_millis(30));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
