// file: src/detection/heuristics.rs
// description: pattern based sensitive data rules with fixed confidences
// reference: pattern matching against compiled regexes

use crate::detection::patterns::{EMAIL, PAYMENT_CARD, PHONE, SSN, is_plausible_ssn, luhn_valid};
use crate::error::{PipelineError, Result};
use crate::models::{Category, Finding, FindingSource, TextChunk};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeuristicRule {
    Email,
    Phone,
    Ssn,
    PaymentCard,
}

impl HeuristicRule {
    pub const ALL: [HeuristicRule; 4] = [
        HeuristicRule::Email,
        HeuristicRule::Phone,
        HeuristicRule::Ssn,
        HeuristicRule::PaymentCard,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HeuristicRule::Email => "email",
            HeuristicRule::Phone => "phone",
            HeuristicRule::Ssn => "ssn",
            HeuristicRule::PaymentCard => "payment_card",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rule| rule.name() == name.trim().to_lowercase())
    }

    pub fn category(&self) -> Category {
        match self {
            HeuristicRule::Email => Category::Email,
            HeuristicRule::Phone => Category::Phone,
            HeuristicRule::Ssn => Category::GovernmentId,
            HeuristicRule::PaymentCard => Category::PaymentCard,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            HeuristicRule::Email => 0.90,
            HeuristicRule::Phone => 0.60,
            HeuristicRule::Ssn => 0.85,
            HeuristicRule::PaymentCard => 0.90,
        }
    }

    pub fn source(&self) -> FindingSource {
        FindingSource::Heuristic(self.name().to_string())
    }

    pub fn find_matches<'t>(&self, text: &'t str) -> Vec<&'t str> {
        match self {
            HeuristicRule::Email => EMAIL.find_iter(text).map(|m| m.as_str()).collect(),
            HeuristicRule::Phone => PHONE.find_iter(text).map(|m| m.as_str().trim()).collect(),
            HeuristicRule::Ssn => SSN
                .find_iter(text)
                .map(|m| m.as_str())
                .filter(|s| is_plausible_ssn(s))
                .collect(),
            HeuristicRule::PaymentCard => PAYMENT_CARD
                .find_iter(text)
                .map(|m| m.as_str())
                .filter(|s| luhn_valid(s))
                .collect(),
        }
    }
}

pub struct HeuristicDetector {
    rules: Vec<HeuristicRule>,
}

impl HeuristicDetector {
    pub fn new(rules: Vec<HeuristicRule>) -> Self {
        Self { rules }
    }

    pub fn from_names(names: &[String]) -> Result<Self> {
        let rules = names
            .iter()
            .map(|name| {
                HeuristicRule::from_name(name).ok_or_else(|| {
                    PipelineError::Config(format!("unknown heuristic rule: {}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// One finding per distinct match and rule within the chunk.
    pub fn detect(&self, chunk: &TextChunk) -> Vec<Finding> {
        let mut findings = Vec::new();

        for rule in &self.rules {
            let mut seen = HashSet::new();
            for matched in rule.find_matches(&chunk.text) {
                if !seen.insert(matched) {
                    continue;
                }
                findings.push(Finding {
                    link_id: chunk.link_id.clone(),
                    unit_index: chunk.unit_index,
                    chunk_index: Some(chunk.chunk_index),
                    category: rule.category(),
                    matched_text: matched.to_string(),
                    sources: vec![rule.source()],
                    confidence: rule.confidence(),
                    conflict: false,
                });
            }
        }

        findings
    }
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::new(HeuristicRule::ALL.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> TextChunk {
        TextChunk {
            link_id: "abc".to_string(),
            unit_index: 0,
            chunk_index: 3,
            text: text.to_string(),
            char_range: 0..text.chars().count(),
        }
    }

    #[test]
    fn test_detects_every_rule() {
        let text = "Mail jane@acme.com or call 555-123-4567. SSN 123-45-6789, card 4111 1111 1111 1111.";
        let findings = HeuristicDetector::default().detect(&chunk(text));

        let pairs: Vec<(Category, &str)> = findings
            .iter()
            .map(|f| (f.category, f.matched_text.as_str()))
            .collect();
        assert!(pairs.contains(&(Category::Email, "jane@acme.com")));
        assert!(pairs.contains(&(Category::Phone, "555-123-4567")));
        assert!(pairs.contains(&(Category::GovernmentId, "123-45-6789")));
        assert!(pairs.contains(&(Category::PaymentCard, "4111 1111 1111 1111")));
        assert!(findings.iter().all(|f| f.chunk_index == Some(3)));
    }

    #[test]
    fn test_invalid_card_is_ignored() {
        let findings = HeuristicDetector::new(vec![HeuristicRule::PaymentCard])
            .detect(&chunk("card 4111 1111 1111 1112"));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_repeated_match_reported_once() {
        let findings = HeuristicDetector::new(vec![HeuristicRule::Email])
            .detect(&chunk("jane@acme.com, again jane@acme.com"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, 0.90);
        assert_eq!(findings[0].sources, vec![FindingSource::Heuristic("email".to_string())]);
    }

    #[test]
    fn test_unknown_rule_name_rejected() {
        assert!(HeuristicDetector::from_names(&["email".to_string()]).is_ok());
        assert!(HeuristicDetector::from_names(&["iban".to_string()]).is_err());
    }
}
