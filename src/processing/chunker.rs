// file: src/processing/chunker.rs
// description: splits unit text into bounded contiguous chunks at natural boundaries
// reference: internal text processing

use crate::models::{ExtractionUnit, TextChunk};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingSummary {
    pub total_chunks: usize,
    pub total_chars: usize,
    pub total_words: usize,
    pub average_chunk_chars: f64,
}

impl ChunkingSummary {
    pub fn from_chunks<'a>(chunks: impl IntoIterator<Item = &'a TextChunk>) -> Self {
        let mut summary = Self::default();
        for chunk in chunks {
            summary.total_chunks += 1;
            summary.total_chars += chunk.char_count();
            summary.total_words += chunk.word_count();
        }
        if summary.total_chunks > 0 {
            summary.average_chunk_chars = summary.total_chars as f64 / summary.total_chunks as f64;
        }
        summary
    }

    pub fn merge(&mut self, other: &ChunkingSummary) {
        self.total_chunks += other.total_chunks;
        self.total_chars += other.total_chars;
        self.total_words += other.total_words;
        self.average_chunk_chars = if self.total_chunks == 0 {
            0.0
        } else {
            self.total_chars as f64 / self.total_chunks as f64
        };
    }
}

pub struct TextChunker {
    chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_units(&self, units: &[ExtractionUnit]) -> Vec<TextChunk> {
        units.iter().flat_map(|unit| self.chunk_unit(unit)).collect()
    }

    pub fn chunk_unit(&self, unit: &ExtractionUnit) -> Vec<TextChunk> {
        self.chunk(&unit.link_id, unit.unit_index, &unit.text)
    }

    /// Concatenating the returned chunk texts reproduces `text` exactly.
    pub fn chunk(&self, link_id: &str, unit_index: usize, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = if chars.len() - start <= self.chunk_size {
                chars.len()
            } else {
                self.split_point(&chars, start)
            };

            chunks.push(TextChunk {
                link_id: link_id.to_string(),
                unit_index,
                chunk_index: chunks.len(),
                text: chars[start..end].iter().collect(),
                char_range: start..end,
            });
            start = end;
        }

        debug!(
            "Chunked unit {} of {} into {} chunk(s)",
            unit_index,
            link_id,
            chunks.len()
        );
        chunks
    }

    /// Exclusive end for the chunk starting at `start`. Sentence and line
    /// boundaries are only taken in the back half of the window.
    fn split_point(&self, chars: &[char], start: usize) -> usize {
        let limit = start + self.chunk_size;
        let soft_floor = start + self.chunk_size / 2;

        let sentence_end = |end: usize| {
            end >= start + 2
                && chars[end - 1].is_whitespace()
                && matches!(chars[end - 2], '.' | '!' | '?')
        };
        let line_break = |end: usize| chars[end - 1] == '\n';
        let whitespace = |end: usize| chars[end - 1].is_whitespace();

        last_matching(soft_floor.max(start + 1), limit, sentence_end)
            .or_else(|| last_matching(soft_floor.max(start + 1), limit, line_break))
            .or_else(|| last_matching(start + 1, limit, whitespace))
            .unwrap_or(limit)
    }
}

fn last_matching(floor: usize, limit: usize, accept: impl Fn(usize) -> bool) -> Option<usize> {
    (floor..=limit).rev().find(|&end| accept(end))
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1000)
    }
}
