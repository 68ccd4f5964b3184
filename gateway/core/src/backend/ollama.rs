//! Ollama Backend Implementation
//!
//! # Ollama API
//!
//! - `/api/generate` - single completion (`stream: false`)
//! - `/api/tags` - list installed models
//!
//! A 404, or a body mentioning "not found", is reported as
//! [`BackendError::ModelNotFound`] so the router can move to another model.

use std::time::Duration;

use async_trait::async_trait;

use super::traits::{BackendError, Generation, GenerationRequest, InferenceBackend};

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Per-call timeout for generation
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            host: host.into(),
            port,
            request_timeout,
            http_client,
        }
    }

    /// Create from environment variables (`OLLAMA_HOST`, `OLLAMA_PORT`)
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self::new(host, port, Duration::from_secs(120))
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the request body for `/api/generate`
    fn build_body(request: &GenerationRequest) -> serde_json::Value {
        let prompt = match &request.context {
            Some(context) => format!("{context}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };

        let mut options = serde_json::json!({
            "temperature": request.sampling.temperature,
            "top_p": request.sampling.top_p,
            "repeat_penalty": request.sampling.repeat_penalty,
        });
        if request.sampling.top_k > 0 {
            options["top_k"] = serde_json::json!(request.sampling.top_k);
        }
        if request.max_tokens > 0 {
            options["num_predict"] = serde_json::json!(request.max_tokens);
        }
        if let Some(threads) = request.threads {
            options["num_thread"] = serde_json::json!(threads);
        }
        if let Some(layers) = request.gpu_layers {
            options["num_gpu"] = serde_json::json!(layers);
        }

        serde_json::json!({
            "model": request.model,
            "prompt": prompt,
            "stream": false,
            "options": options,
        })
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.request_timeout)
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", 11434, Duration::from_secs(120))
    }
}

/// Classify a non-success status
fn classify_failure(model: &str, status: reqwest::StatusCode, body: String) -> BackendError {
    if status == reqwest::StatusCode::NOT_FOUND || body.to_lowercase().contains("not found") {
        BackendError::ModelNotFound(model.to_string())
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let response = self
            .http_client
            .post(self.generate_url())
            .timeout(self.request_timeout)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(&request.model, status, body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let text = data
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| BackendError::InvalidResponse("missing `response` field".into()))?
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);

        // Ollama reports nanoseconds
        let duration_ms = data
            .get("total_duration")
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |ns| ns / 1_000_000);

        Ok(Generation {
            text,
            model: request.model.clone(),
            tokens_used,
            duration_ms,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SamplingParams;

    #[test]
    fn test_body_carries_sampling_options() {
        let request = GenerationRequest::new("tiny", "hello")
            .with_max_tokens(64)
            .with_sampling(SamplingParams {
                temperature: 0.2,
                top_p: 0.5,
                top_k: 0,
                repeat_penalty: 1.3,
            });
        let body = OllamaBackend::build_body(&request);

        assert_eq!(body["model"], "tiny");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        assert!(body["options"].get("top_k").is_none());
    }

    #[test]
    fn test_context_is_prepended() {
        let request =
            GenerationRequest::new("tiny", "question").with_context(Some("background".into()));
        let body = OllamaBackend::build_body(&request);
        assert_eq!(body["prompt"], "background\n\nquestion");
    }

    #[test]
    fn test_not_found_maps_to_model_error() {
        let err = classify_failure(
            "huge",
            reqwest::StatusCode::NOT_FOUND,
            r#"{"error":"model 'huge' not found"}"#.into(),
        );
        assert!(err.is_model_unavailable());

        let err = classify_failure("huge", reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(matches!(err, BackendError::Rejected { status: 500, .. }));
    }
}
