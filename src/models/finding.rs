// file: src/models/finding.rs
// description: detected sensitive data occurrences with provenance and confidence
// reference: internal data structures

use crate::error::DetectionErrorKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Shared category taxonomy for heuristic and AI sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Email,
    Phone,
    GovernmentId,
    PaymentCard,
    Credentials,
    Financial,
    Health,
    Personal,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Phone => "phone",
            Category::GovernmentId => "government_id",
            Category::PaymentCard => "payment_card",
            Category::Credentials => "credentials",
            Category::Financial => "financial",
            Category::Health => "health",
            Category::Personal => "personal",
            Category::Other => "other",
        }
    }

    /// Maps a free-form label (as emitted by models) onto the taxonomy.
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();

        match key.trim_matches('_') {
            "email" | "email_address" | "e_mail" => Category::Email,
            "phone" | "phone_number" | "telephone" | "mobile" => Category::Phone,
            "government_id" | "ssn" | "social_security_number" | "national_id" | "passport"
            | "tax_id" | "drivers_license" => Category::GovernmentId,
            "payment_card" | "credit_card" | "card_number" | "debit_card" => Category::PaymentCard,
            "credentials" | "credential" | "password" | "secret" | "secrets" | "api_key"
            | "token" | "private_key" => Category::Credentials,
            "financial" | "bank_account" | "iban" | "account_number" => Category::Financial,
            "health" | "phi" | "medical" => Category::Health,
            "personal" | "pii" | "name" | "address" | "date_of_birth" | "studentrecords"
            | "student_records" | "hr" => Category::Personal,
            _ => Category::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a finding, serialized as `ai:<model>` or `heuristic:<rule>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FindingSource {
    Ai(String),
    Heuristic(String),
}

impl fmt::Display for FindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingSource::Ai(model) => write!(f, "ai:{}", model),
            FindingSource::Heuristic(rule) => write!(f, "heuristic:{}", rule),
        }
    }
}

impl FromStr for FindingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("ai", model)) if !model.is_empty() => Ok(FindingSource::Ai(model.to_string())),
            Some(("heuristic", rule)) if !rule.is_empty() => {
                Ok(FindingSource::Heuristic(rule.to_string()))
            }
            _ => Err(format!("invalid finding source: {}", s)),
        }
    }
}

impl Serialize for FindingSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FindingSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub link_id: String,
    pub unit_index: usize,
    pub chunk_index: Option<usize>,
    pub category: Category,
    pub matched_text: String,
    pub sources: Vec<FindingSource>,
    pub confidence: f32,
    #[serde(default)]
    pub conflict: bool,
}

impl Finding {
    pub fn has_source(&self, source: &FindingSource) -> bool {
        self.sources.contains(source)
    }
}

/// Per-chunk audit record of which sources ran and which degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDetection {
    pub link_id: String,
    pub unit_index: usize,
    pub chunk_index: usize,
    pub degraded: bool,
    #[serde(default)]
    pub degraded_sources: Vec<String>,
    #[serde(default)]
    pub errors: Vec<DetectionErrorKind>,
    #[serde(default)]
    pub ai_skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub link_id: String,
    pub chunks: Vec<ChunkDetection>,
    pub findings: Vec<Finding>,
}

impl DetectionResult {
    pub fn degraded_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.degraded).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trip_format() {
        let source = FindingSource::Ai("llama3.1".to_string());
        assert_eq!(source.to_string(), "ai:llama3.1");
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, "\"ai:llama3.1\"");
        let back: FindingSource = serde_json::from_str("\"heuristic:email\"").unwrap();
        assert_eq!(back, FindingSource::Heuristic("email".to_string()));
        assert!("bogus".parse::<FindingSource>().is_err());
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(Category::from_label("PII"), Category::Personal);
        assert_eq!(Category::from_label("PHI"), Category::Health);
        assert_eq!(Category::from_label("Credit Card"), Category::PaymentCard);
        assert_eq!(Category::from_label("SSN"), Category::GovernmentId);
        assert_eq!(Category::from_label("email_address"), Category::Email);
        assert_eq!(Category::from_label("Secrets"), Category::Credentials);
        assert_eq!(Category::from_label("weather"), Category::Other);
    }
}
