// file: src/detection/providers/mod.rs
// description: ai provider trait, registry and tolerant model output parsing
// reference: https://docs.rs/async-trait

pub mod ollama;

pub use ollama::OllamaProvider;

use crate::config::ProviderConfig;
use crate::error::{DetectionError, DetectionErrorKind, PipelineError, Result};
use crate::models::{Category, SourceMethod, UnitKind};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One span flagged by a model, already mapped onto the category taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct AiSpan {
    pub category: Category,
    pub span: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct DetectionContext {
    pub file_name: String,
    pub unit_kind: UnitKind,
    pub source_method: SourceMethod,
    /// Raw image bytes, only set for the vision model on image units.
    pub image: Option<Bytes>,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn model(&self) -> String;

    async fn analyze(
        &self,
        text: &str,
        context: &DetectionContext,
    ) -> std::result::Result<Vec<AiSpan>, DetectionError>;
}

pub type ProviderConstructor = fn(&ProviderConfig) -> Result<Arc<dyn AiProvider>>;

#[derive(Clone)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("ollama", OllamaProvider::build);
        registry
    }

    pub fn register(&mut self, key: &str, constructor: ProviderConstructor) {
        self.constructors.insert(key.to_lowercase(), constructor);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn AiProvider>> {
        let constructor = self
            .constructors
            .get(&config.provider.to_lowercase())
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "unknown ai provider '{}' (available: {})",
                    config.provider,
                    self.keys().join(", ")
                ))
            })?;
        constructor(config)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Parses `{"findings": [{category, span, confidence}]}` out of raw model output.
/// Code fences and prose around the JSON are ignored, a bare array is accepted,
/// items without a span are dropped and confidences are clamped to `[0, 1]`.
pub fn parse_ai_output(raw: &str) -> std::result::Result<Vec<AiSpan>, DetectionError> {
    let candidates = json_candidates(raw);
    if candidates.is_empty() {
        return Err(DetectionError::new(
            DetectionErrorKind::ParseError,
            format!("no JSON found in model output: {}", preview(raw)),
        ));
    }

    let mut last_error = None;
    let value = candidates.into_iter().find_map(|payload| {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) if is_findings_shape(&value) => Some(value),
            Ok(_) => None,
            Err(e) => {
                last_error = Some(e.to_string());
                None
            }
        }
    });
    let value = value.ok_or_else(|| {
        DetectionError::new(
            DetectionErrorKind::ParseError,
            last_error.unwrap_or_else(|| format!("unexpected model output: {}", preview(raw))),
        )
    })?;

    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("findings") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => {
                return Err(DetectionError::new(
                    DetectionErrorKind::ParseError,
                    "findings is not an array",
                ));
            }
        },
        _ => &[],
    };

    Ok(items.iter().filter_map(span_from_value).collect())
}

/// An object, or an array holding only objects. Citation brackets like `[1]`
/// in surrounding prose do not qualify.
fn is_findings_shape(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().all(Value::is_object),
        _ => false,
    }
}

fn span_from_value(item: &Value) -> Option<AiSpan> {
    let span = ["span", "text", "value"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let category = item
        .get("category")
        .and_then(Value::as_str)
        .map(Category::from_label)
        .unwrap_or(Category::Other);

    let confidence = match item.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5) as f32,
        Some(Value::String(s)) => s.trim().parse::<f32>().unwrap_or(0.5),
        _ => 0.5,
    };

    Some(AiSpan {
        category,
        span: span.to_string(),
        confidence: if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        },
    })
}

/// Outermost `{..}` and `[..]` slices of `raw`, earliest start first.
fn json_candidates(raw: &str) -> Vec<&str> {
    let mut bounds: Vec<(usize, usize)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| raw.find(open).zip(raw.rfind(close)))
        .filter(|(start, end)| start < end)
        .collect();
    bounds.sort_unstable();
    bounds.into_iter().map(|(start, end)| &raw[start..=end]).collect()
}

fn preview(raw: &str) -> String {
    raw.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_plain_object() {
        let spans = parse_ai_output(
            r#"{"findings":[{"category":"PII","span":"jane@acme.com","confidence":0.95}]}"#,
        )
        .unwrap();
        assert_eq!(
            spans,
            vec![AiSpan {
                category: Category::Personal,
                span: "jane@acme.com".to_string(),
                confidence: 0.95,
            }]
        );
    }

    #[test]
    fn test_parse_fenced_output_with_prose() {
        let raw = "Here you go:\n```json\n{\"findings\": [{\"category\": \"email\", \"span\": \"a@b.io\", \"confidence\": 3}]}\n```";
        let spans = parse_ai_output(raw).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].category, Category::Email);
        assert_eq!(spans[0].confidence, 1.0);
    }

    #[test]
    fn test_items_without_span_are_dropped() {
        let raw = r#"{"findings":[{"category":"ssn"},{"category":"ssn","span":"123-45-6789","confidence":"0.7"}]}"#;
        let spans = parse_ai_output(raw).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].category, Category::GovernmentId);
        assert_eq!(spans[0].confidence, 0.7);
    }

    #[test]
    fn test_empty_and_bare_array() {
        assert!(parse_ai_output(r#"{"findings": []}"#).unwrap().is_empty());
        assert!(parse_ai_output(r#"{}"#).unwrap().is_empty());
        let spans = parse_ai_output(r#"[{"category":"password","span":"hunter2"}]"#).unwrap();
        assert_eq!(spans[0].category, Category::Credentials);
        assert_eq!(spans[0].confidence, 0.5);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = parse_ai_output("I could not find anything").unwrap_err();
        assert_eq!(err.kind, DetectionErrorKind::ParseError);
        let err = parse_ai_output("{not json}").unwrap_err();
        assert_eq!(err.kind, DetectionErrorKind::ParseError);
    }

    #[test]
    fn test_bracketed_prose_before_object() {
        let raw = r#"As noted in [1]: {"findings":[{"category":"email","span":"ops@acme.com","confidence":0.8}]}"#;
        let spans = parse_ai_output(raw).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span, "ops@acme.com");

        let err = parse_ai_output("See [1] and [2].").unwrap_err();
        assert_eq!(err.kind, DetectionErrorKind::ParseError);
    }

    #[test]
    fn test_registry_rejects_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.keys(), vec!["ollama".to_string()]);

        let config = ProviderConfig {
            provider: "mystery".to_string(),
            model: "m".to_string(),
            host: "http://localhost:1".to_string(),
            timeout_secs: 1,
            max_retries: 0,
        };
        assert!(registry.build(&config).is_err());

        let config = ProviderConfig {
            provider: "Ollama".to_string(),
            ..config
        };
        let provider = registry.build(&config).unwrap();
        assert_eq!(provider.model(), "m");
    }
}
