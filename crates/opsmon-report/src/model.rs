//! Generative model seam and the Ollama implementation.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::debug;

use opsmon_core::OllamaConfig;

use crate::error::ModelError;

const SNIPPET_LEN: usize = 240;

/// One completion request. The model is asked to emit JSON conforming
/// to `schema`.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub schema: Value,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Something that turns a prompt into raw text.
pub trait ReportModel: Send + Sync + 'static {
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> impl Future<Output = Result<String, ModelError>> + Send;
}

#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(&self, request: &GenerateRequest) -> Value {
        let mut options = Map::new();
        options.insert("temperature".to_string(), json!(request.temperature));
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "format": request.schema,
            "options": options,
        })
    }
}

impl ReportModel for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        let url = self.generate_url();
        let body = self.request_body(&request);
        debug!(%url, model = %self.model, "calling ollama");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify(e, request.timeout))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| classify(e, request.timeout))?;

        if status >= 400 {
            return Err(ModelError::Http {
                status,
                snippet: snippet(&text),
            });
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(envelope)) => Ok(envelope
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            Ok(_) => Err(ModelError::Envelope("unexpected payload".to_string())),
            Err(_) => Err(ModelError::Envelope(snippet(&text))),
        }
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> ModelError {
    if error.is_timeout() {
        ModelError::Timeout(timeout)
    } else {
        ModelError::Connection(error.to_string())
    }
}

/// Leading part of a response body, flattened to one line.
fn snippet(text: &str) -> String {
    text.chars()
        .take(SNIPPET_LEN)
        .collect::<String>()
        .replace('\n', "\\n")
}
