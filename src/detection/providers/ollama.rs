// file: src/detection/providers/ollama.rs
// description: ollama http provider with generate to chat fallback and bounded retry
// reference: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::config::ProviderConfig;
use crate::detection::providers::{AiProvider, AiSpan, DetectionContext, parse_ai_output};
use crate::error::{DetectionError, DetectionErrorKind, PipelineError, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You return only compact JSON for sensitivity classification.";
const TEMPERATURE: f32 = 0.2;

enum Endpoint {
    Generate,
    Chat,
}

struct CallError {
    error: DetectionError,
    retryable: bool,
    not_found: bool,
}

impl CallError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        Self {
            error: DetectionError::from_reqwest(&err),
            retryable,
            not_found: false,
        }
    }
}

pub struct OllamaProvider {
    client: Client,
    model: String,
    host: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build ollama client: {}", e)))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            host: config.host.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    pub fn build(config: &ProviderConfig) -> Result<Arc<dyn AiProvider>> {
        Ok(Arc::new(Self::new(config)?))
    }

    pub fn build_prompt(text: &str, context: &DetectionContext) -> String {
        format!(
            "You are a data sensitivity classifier. Find every span of sensitive data in the text below. \
             Example and template files are not sensitive. \
             Categories: email, phone, government_id, payment_card, credentials, financial, health, personal, other. \
             Reply strictly as compact JSON: {{\"findings\": [{{\"category\": string, \"span\": exact text copied from the input, \"confidence\": 0..1}}]}}. \
             Reply {{\"findings\": []}} when nothing is sensitive.\n\n\
             File: {}\nSection: {:?} ({} extraction)\n\nText:\n'''\n{}\n'''\n\nJSON:",
            context.file_name, context.unit_kind, context.source_method, text
        )
    }

    /// Images go out base64-encoded in the `images` field of the request or message.
    fn request_body(&self, endpoint: &Endpoint, prompt: &str, image: Option<&[u8]>) -> Value {
        let mut body = match endpoint {
            Endpoint::Generate => json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
                "options": { "temperature": TEMPERATURE },
            }),
            Endpoint::Chat => json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
                "stream": false,
                "format": "json",
                "options": { "temperature": TEMPERATURE },
            }),
        };

        if let Some(image) = image {
            let images = json!([STANDARD.encode(image)]);
            match endpoint {
                Endpoint::Generate => body["images"] = images,
                Endpoint::Chat => body["messages"][1]["images"] = images,
            }
        }
        body
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> std::result::Result<String, CallError> {
        let path = match endpoint {
            Endpoint::Generate => "api/generate",
            Endpoint::Chat => "api/chat",
        };
        let url = format!("{}/{}", self.host, path);

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(&endpoint, prompt, image))
            .send()
            .await
            .map_err(CallError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError {
                error: DetectionError::new(
                    DetectionErrorKind::ProviderUnreachable,
                    format!("ollama {} returned {}: {}", path, status, body.trim()),
                ),
                retryable: should_retry(status),
                not_found: status == StatusCode::NOT_FOUND,
            });
        }

        let data: Value = response.json().await.map_err(CallError::from_reqwest)?;
        Ok(match endpoint {
            Endpoint::Generate => generate_output(&data),
            Endpoint::Chat => chat_output(&data),
        })
    }

    async fn complete(
        &self,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> std::result::Result<String, CallError> {
        match self.call(Endpoint::Generate, prompt, image).await {
            Err(err) if err.not_found => {
                debug!("ollama generate endpoint missing, falling back to chat");
                self.call(Endpoint::Chat, prompt, image).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn model(&self) -> String {
        self.model.clone()
    }

    async fn analyze(
        &self,
        text: &str,
        context: &DetectionContext,
    ) -> std::result::Result<Vec<AiSpan>, DetectionError> {
        let prompt = Self::build_prompt(text, context);
        let mut attempt = 0;

        loop {
            match self.complete(&prompt, context.image.as_deref()).await {
                Ok(output) => return parse_ai_output(&output),
                Err(err) if err.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "ollama call for {} failed ({}), retry {}/{}",
                        context.file_name, err.error, attempt, self.max_retries
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err.error),
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    Duration::from_millis(500 * (1 << capped))
}

fn generate_output(data: &Value) -> String {
    data.get("response")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn chat_output(data: &Value) -> String {
    data.get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceMethod, UnitKind};

    fn config(host: &str) -> ProviderConfig {
        ProviderConfig {
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            host: host.to_string(),
            timeout_secs: 2,
            max_retries: 0,
        }
    }

    fn context() -> DetectionContext {
        DetectionContext {
            file_name: "invoice.pdf".to_string(),
            unit_kind: UnitKind::Page,
            source_method: SourceMethod::Both,
            image: None,
        }
    }

    #[test]
    fn test_prompt_carries_file_name_and_text() {
        let prompt = OllamaProvider::build_prompt("Invoice #4521", &context());
        assert!(prompt.contains("File: invoice.pdf"));
        assert!(prompt.contains("Invoice #4521"));
        assert!(prompt.contains("\"findings\""));
    }

    #[test]
    fn test_request_bodies() {
        let provider = OllamaProvider::new(&config("http://localhost:11434/")).unwrap();
        assert_eq!(provider.host, "http://localhost:11434");

        let body = provider.request_body(&Endpoint::Generate, "p", None);
        assert_eq!(body["prompt"], "p");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert!(body.get("images").is_none());

        let body = provider.request_body(&Endpoint::Chat, "p", None);
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "p");
    }

    #[test]
    fn test_image_is_sent_base64_encoded() {
        let provider = OllamaProvider::new(&config("http://localhost:11434")).unwrap();

        let body = provider.request_body(&Endpoint::Generate, "p", Some(b"img"));
        assert_eq!(body["images"], json!(["aW1n"]));

        let body = provider.request_body(&Endpoint::Chat, "p", Some(b"img"));
        assert_eq!(body["messages"][1]["images"], json!(["aW1n"]));
        assert!(body["messages"][0].get("images").is_none());
    }

    #[test]
    fn test_response_fields() {
        let generate = json!({ "response": " {\"findings\": []} " });
        assert_eq!(generate_output(&generate), "{\"findings\": []}");

        let chat = json!({ "message": { "role": "assistant", "content": "{}" } });
        assert_eq!(chat_output(&chat), "{}");
        assert_eq!(chat_output(&json!({})), "");
    }

    #[test]
    fn test_retry_policy() {
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(9), Duration::from_millis(16000));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_a_parse_error() {
        let provider = OllamaProvider::new(&config("http://127.0.0.1:9")).unwrap();
        let err = provider.analyze("text", &context()).await.unwrap_err();
        assert_ne!(err.kind, DetectionErrorKind::ParseError);
    }
}
