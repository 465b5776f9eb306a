// file: src/detection/engine.rs
// description: runs heuristics and ai providers over chunks and merges their findings
// reference: internal detection processing

use crate::config::DetectionConfig;
use crate::detection::heuristics::HeuristicDetector;
use crate::detection::merge::{merge_findings, rank_findings};
use crate::detection::providers::{AiProvider, DetectionContext, ProviderRegistry};
use crate::error::Result;
use crate::models::{
    ChunkDetection, DetectionResult, ExtractionUnit, Finding, FindingSource, SourceMethod,
    TextChunk, UnitKind,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub findings: Vec<Finding>,
    pub detection: ChunkDetection,
}

pub struct DetectionEngine {
    heuristics: HeuristicDetector,
    primary: Option<Arc<dyn AiProvider>>,
    vision: Option<Arc<dyn AiProvider>>,
}

impl DetectionEngine {
    pub fn new(
        heuristics: HeuristicDetector,
        primary: Option<Arc<dyn AiProvider>>,
        vision: Option<Arc<dyn AiProvider>>,
    ) -> Self {
        Self {
            heuristics,
            primary,
            vision,
        }
    }

    pub fn from_config(config: &DetectionConfig, registry: &ProviderRegistry) -> Result<Self> {
        let heuristics = HeuristicDetector::from_names(&config.heuristics)?;
        let primary = registry.build(&config.primary)?;
        let vision = config
            .vision
            .as_ref()
            .map(|vision| registry.build(vision))
            .transpose()?;
        Ok(Self::new(heuristics, Some(primary), vision))
    }

    pub fn models(&self) -> Vec<String> {
        self.primary
            .iter()
            .chain(self.vision.iter())
            .map(|provider| provider.model())
            .collect()
    }

    /// The primary model reads text only. The vision model joins on image units
    /// and is the only one that receives the image itself.
    fn calls_for(
        &self,
        chunk: &TextChunk,
        context: &DetectionContext,
    ) -> Vec<(&Arc<dyn AiProvider>, DetectionContext)> {
        let mut calls = Vec::new();
        if !chunk.text.trim().is_empty() {
            let text_only = DetectionContext {
                image: None,
                ..context.clone()
            };
            calls.extend(self.primary.iter().map(|p| (p, text_only.clone())));
        }
        if context.unit_kind == UnitKind::Image
            && (context.image.is_some() || !chunk.text.trim().is_empty())
        {
            calls.extend(self.vision.iter().map(|p| (p, context.clone())));
        }
        calls
    }

    /// Provider failures degrade the chunk to the remaining sources and are
    /// recorded on the returned `ChunkDetection`; they never surface as errors.
    pub async fn detect(
        &self,
        chunk: &TextChunk,
        context: &DetectionContext,
        skip_ai: bool,
    ) -> ChunkOutcome {
        let mut detection = ChunkDetection {
            link_id: chunk.link_id.clone(),
            unit_index: chunk.unit_index,
            chunk_index: chunk.chunk_index,
            degraded: false,
            degraded_sources: Vec::new(),
            errors: Vec::new(),
            ai_skipped: skip_ai,
        };

        let mut findings = self.heuristics.detect(chunk);

        if !skip_ai {
            for (provider, call_context) in self.calls_for(chunk, context) {
                let model = provider.model();
                match provider.analyze(&chunk.text, &call_context).await {
                    Ok(spans) => {
                        debug!(
                            "{} flagged {} span(s) in chunk {}/{} of {}",
                            model,
                            spans.len(),
                            chunk.unit_index,
                            chunk.chunk_index,
                            chunk.link_id
                        );
                        findings.extend(spans.into_iter().map(|span| Finding {
                            link_id: chunk.link_id.clone(),
                            unit_index: chunk.unit_index,
                            chunk_index: Some(chunk.chunk_index),
                            category: span.category,
                            matched_text: span.span,
                            sources: vec![FindingSource::Ai(model.clone())],
                            confidence: span.confidence,
                            conflict: false,
                        }));
                    }
                    Err(err) => {
                        warn!(
                            "Detection degraded for chunk {}/{} of {}: {}",
                            chunk.unit_index, chunk.chunk_index, chunk.link_id, err
                        );
                        detection.degraded = true;
                        detection
                            .degraded_sources
                            .push(FindingSource::Ai(model).to_string());
                        detection.errors.push(err.kind);
                    }
                }
            }
        }

        ChunkOutcome {
            findings: merge_findings(findings),
            detection,
        }
    }

    /// Chunks are processed in order; each one is looked up against its unit for context.
    /// `image` carries the source file of an image document. An image unit that
    /// produced no OCR text still gets one pass through the vision model.
    pub async fn detect_chunks(
        &self,
        link_id: &str,
        file_name: &str,
        units: &[ExtractionUnit],
        chunks: &[TextChunk],
        image: Option<Bytes>,
        skip_ai: bool,
    ) -> DetectionResult {
        let mut result = DetectionResult {
            link_id: link_id.to_string(),
            chunks: Vec::with_capacity(chunks.len()),
            findings: Vec::new(),
        };

        let mut pending: Vec<TextChunk> = chunks.to_vec();
        if image.is_some() && self.vision.is_some() {
            for unit in units.iter().filter(|u| u.unit_kind == UnitKind::Image) {
                if !chunks.iter().any(|c| c.unit_index == unit.unit_index) {
                    pending.push(TextChunk {
                        link_id: link_id.to_string(),
                        unit_index: unit.unit_index,
                        chunk_index: 0,
                        text: String::new(),
                        char_range: 0..0,
                    });
                }
            }
        }

        for chunk in &pending {
            let unit = units.iter().find(|u| u.unit_index == chunk.unit_index);
            let unit_kind = unit.map(|u| u.unit_kind).unwrap_or(UnitKind::FullText);
            let context = DetectionContext {
                file_name: file_name.to_string(),
                unit_kind,
                source_method: unit.map(|u| u.source_method).unwrap_or(SourceMethod::Native),
                image: image.clone().filter(|_| unit_kind == UnitKind::Image),
            };

            let outcome = self.detect(chunk, &context, skip_ai).await;
            result.chunks.push(outcome.detection);
            result.findings.extend(outcome.findings);
        }

        rank_findings(&mut result.findings);
        result
    }
}
