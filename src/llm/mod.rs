//! Completion client abstraction used by the chunk summarizer.
//!
//! The pipeline only depends on [`LlmClient`]; the Ollama adapter issues HTTP requests directly
//! to the runtime's `/api/generate` endpoint and reports the prompt/completion token counts the
//! runtime returns.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// Provider was unreachable or misconfigured.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request payload passed to the completion provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// User prompt carrying the text to process.
    pub prompt: String,
    /// System prompt steering the model's behaviour.
    pub system_prompt: String,
    /// Fully qualified model identifier understood by the provider.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of tokens the completion may contain.
    pub max_tokens: usize,
}

/// Completion text and usage returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the request.
    async fn generate_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, LlmClientError>;
}

/// Completion client talking to a local Ollama runtime.
pub struct OllamaLlmClient {
    http: Client,
    base_url: String,
}

impl OllamaLlmClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, LlmClientError> {
        let http = Client::builder()
            .user_agent("condense/completion")
            .build()
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn generate_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, LlmClientError> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "system": request.system_prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        tracing::trace!(
            model = %request.model,
            input_tokens = body.prompt_eval_count,
            output_tokens = body.eval_count,
            "Completion received"
        );

        Ok(Completion {
            content: body.response.trim().to_string(),
            input_tokens: body.prompt_eval_count,
            output_tokens: body.eval_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "Summarize this".into(),
            system_prompt: "You compress course material.".into(),
            model: "llama".into(),
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client = OllamaLlmClient::new(server.base_url()).expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"num_predict\":256")
                    .body_contains("You compress course material.");
                then.status(200).json_body(json!({
                    "response": "  Summary text \n",
                    "done": true,
                    "prompt_eval_count": 120,
                    "eval_count": 30
                }));
            })
            .await;

        let completion = client
            .generate_completion(request())
            .await
            .expect("completion");

        mock.assert_async().await;
        assert_eq!(completion.content, "Summary text");
        assert_eq!(completion.input_tokens, 120);
        assert_eq!(completion.output_tokens, 30);
    }

    #[tokio::test]
    async fn ollama_client_defaults_missing_usage_to_zero() {
        let server = MockServer::start_async().await;
        let client = OllamaLlmClient::new(format!("{}/", server.base_url())).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(json!({ "response": "ok", "done": true }));
            })
            .await;

        let completion = client
            .generate_completion(request())
            .await
            .expect("completion");
        assert_eq!(completion.input_tokens, 0);
        assert_eq!(completion.output_tokens, 0);
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = OllamaLlmClient::new(server.base_url()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .generate_completion(request())
            .await
            .expect_err("error response");

        assert!(
            matches!(&error, LlmClientError::GenerationFailed(message) if message.contains("500")),
            "unexpected error: {error}"
        );
    }

    #[tokio::test]
    async fn ollama_client_rejects_incomplete_response() {
        let server = MockServer::start_async().await;
        let client = OllamaLlmClient::new(server.base_url()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client
            .generate_completion(request())
            .await
            .expect_err("incomplete response");
        assert!(matches!(error, LlmClientError::InvalidResponse(_)));
    }
}
