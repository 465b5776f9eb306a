// file: src/models/chunk.rs
// description: bounded text chunk derived from an extraction unit
// reference: internal data structures

use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub link_id: String,
    pub unit_index: usize,
    pub chunk_index: usize,
    pub text: String,
    /// Half-open character offsets into the unit text.
    pub char_range: Range<usize>,
}

impl TextChunk {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    pub fn char_count(&self) -> usize {
        self.char_range.end - self.char_range.start
    }
}
