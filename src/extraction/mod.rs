// file: src/extraction/mod.rs
// description: text extraction from downloaded files
// reference: internal module structure

pub mod format;
pub mod native;
pub mod ocr;
pub mod router;

pub use format::detect_format;
pub use native::{DocumentParser, NativeParser, ParsedText};
pub use ocr::{OcrEngine, PageRenderer, PdftoppmRenderer, TesseractOcr};
pub use router::{ExtractionRouter, ExtractionSettings};
