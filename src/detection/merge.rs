// file: src/detection/merge.rs
// description: merges findings from several sources by span and ranks the result
// reference: internal detection processing

use crate::models::{Category, Finding};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Case-insensitive and whitespace-collapsed form used to compare spans.
pub fn normalize_span(span: &str) -> String {
    span.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

type SpanKey = (usize, Option<usize>, String);

/// Findings citing the same normalized span are combined. Agreeing categories
/// collapse into one finding carrying every source and the highest confidence.
/// Disagreeing categories keep one finding each, all marked as a conflict.
pub fn merge_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut order: Vec<SpanKey> = Vec::new();
    let mut groups: HashMap<SpanKey, BTreeMap<Category, Finding>> = HashMap::new();

    for finding in findings {
        let key = (
            finding.unit_index,
            finding.chunk_index,
            normalize_span(&finding.matched_text),
        );
        if key.2.is_empty() {
            continue;
        }

        let by_category = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            BTreeMap::new()
        });

        match by_category.get_mut(&finding.category) {
            Some(existing) => {
                existing.sources.extend(finding.sources);
                existing.confidence = existing.confidence.max(finding.confidence);
            }
            None => {
                by_category.insert(finding.category, finding);
            }
        }
    }

    let mut merged = Vec::new();
    for key in order {
        let Some(by_category) = groups.remove(&key) else {
            continue;
        };
        let conflict = by_category.len() > 1;

        for (_, mut finding) in by_category {
            finding.sources.sort();
            finding.sources.dedup();
            finding.conflict = conflict;
            merged.push(finding);
        }
    }

    rank_findings(&mut merged);
    merged
}

/// Confidence descending, then unit, chunk and span.
pub fn rank_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.unit_index.cmp(&b.unit_index))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.matched_text.cmp(&b.matched_text))
            .then_with(|| a.category.cmp(&b.category))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FindingSource;
    use pretty_assertions::assert_eq;

    fn finding(span: &str, category: Category, source: FindingSource, confidence: f32) -> Finding {
        Finding {
            link_id: "abc".to_string(),
            unit_index: 0,
            chunk_index: Some(0),
            category,
            matched_text: span.to_string(),
            sources: vec![source],
            confidence,
            conflict: false,
        }
    }

    fn ai() -> FindingSource {
        FindingSource::Ai("llama3.1".to_string())
    }

    fn email_rule() -> FindingSource {
        FindingSource::Heuristic("email".to_string())
    }

    #[test]
    fn test_agreeing_sources_merge() {
        let merged = merge_findings(vec![
            finding("jane@acme.com", Category::Email, email_rule(), 0.90),
            finding("Jane@ACME.com ", Category::Email, ai(), 0.95),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].matched_text, "jane@acme.com");
        assert_eq!(merged[0].sources, vec![ai(), email_rule()]);
        assert_eq!(merged[0].confidence, 0.95);
        assert!(!merged[0].conflict);
    }

    #[test]
    fn test_duplicate_source_listed_once() {
        let merged = merge_findings(vec![
            finding("jane@acme.com", Category::Email, email_rule(), 0.90),
            finding("jane@acme.com", Category::Email, email_rule(), 0.90),
        ]);
        assert_eq!(merged[0].sources, vec![email_rule()]);
    }

    #[test]
    fn test_category_disagreement_is_conflict() {
        let merged = merge_findings(vec![
            finding("123-45-6789", Category::GovernmentId, FindingSource::Heuristic("ssn".to_string()), 0.85),
            finding("123-45-6789", Category::Phone, ai(), 0.40),
        ]);

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|f| f.conflict));
        assert_eq!(merged[0].category, Category::GovernmentId);
        assert_eq!(merged[1].category, Category::Phone);
    }

    #[test]
    fn test_distinct_chunks_do_not_merge() {
        let mut other = finding("jane@acme.com", Category::Email, ai(), 0.90);
        other.chunk_index = Some(1);
        let merged = merge_findings(vec![
            finding("jane@acme.com", Category::Email, email_rule(), 0.90),
            other,
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_index, Some(0));
        assert_eq!(merged[1].chunk_index, Some(1));
    }

    #[test]
    fn test_ranking_order() {
        let mut findings = vec![
            finding("b", Category::Other, ai(), 0.5),
            finding("a", Category::Other, ai(), 0.5),
            finding("c", Category::Other, ai(), 0.9),
        ];
        rank_findings(&mut findings);
        let spans: Vec<&str> = findings.iter().map(|f| f.matched_text.as_str()).collect();
        assert_eq!(spans, vec!["c", "a", "b"]);
    }
}
