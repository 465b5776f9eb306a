// file: src/extraction/native.rs
// description: native text decoding for text, csv, spreadsheet, docx and pdf files
// reference: https://docs.rs/lopdf, https://docs.rs/calamine, https://docs.rs/zip

use crate::error::{ExtractionError, ExtractionErrorKind};
use crate::models::FileFormat;
use calamine::Reader;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::{Cursor, Read};
use tracing::debug;

lazy_static! {
    static ref DOCX_PARAGRAPH_END: Regex =
        Regex::new(r"</w:p>|<w:br\s*/>").expect("DOCX_PARAGRAPH_END regex is valid");
    static ref DOCX_TEXT_RUN: Regex =
        Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("DOCX_TEXT_RUN regex is valid");
    static ref DOCX_TAB: Regex = Regex::new(r"<w:tab\s*/>").expect("DOCX_TAB regex is valid");
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedText {
    Whole(String),
    /// One entry per page, in page order.
    Pages(Vec<String>),
}

pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], format: FileFormat) -> Result<ParsedText, ExtractionError>;
}

#[derive(Debug, Default, Clone)]
pub struct NativeParser;

impl NativeParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes)
            .trim_start_matches('\u{feff}')
            .to_string()
    }

    fn parse_csv(bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut content = String::new();
        for record in reader.records() {
            let record = record.map_err(|e| ExtractionError::corrupt(e.to_string()))?;
            let fields: Vec<&str> = record.iter().collect();
            if fields.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            content.push_str(&fields.join(" | "));
            content.push('\n');
        }
        Ok(content)
    }

    fn parse_spreadsheet(bytes: &[u8]) -> Result<String, ExtractionError> {
        let cursor = Cursor::new(bytes.to_vec());
        let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
            .map_err(|e| ExtractionError::corrupt(e.to_string()))?;

        let mut content = String::new();
        for sheet_name in workbook.sheet_names().to_vec() {
            let Ok(range) = workbook.worksheet_range(&sheet_name) else {
                debug!("Unreadable sheet: {}", sheet_name);
                continue;
            };

            content.push_str(&format!("Sheet: {}\n", sheet_name));
            for row in range.rows() {
                let cells: Vec<String> = row
                    .iter()
                    .map(|cell| match cell {
                        calamine::Data::Empty => String::new(),
                        calamine::Data::String(s) => s.clone(),
                        calamine::Data::Float(f) => f.to_string(),
                        calamine::Data::Int(i) => i.to_string(),
                        calamine::Data::Bool(b) => b.to_string(),
                        calamine::Data::DateTime(dt) => dt.to_string(),
                        _ => String::new(),
                    })
                    .collect();

                if !cells.iter().all(|c| c.is_empty()) {
                    content.push_str(&cells.join(" | "));
                    content.push('\n');
                }
            }
            content.push('\n');
        }
        Ok(content)
    }

    fn parse_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractionError::corrupt(e.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| ExtractionError::corrupt(format!("word/document.xml: {}", e)))?
            .read_to_string(&mut xml)
            .map_err(|e| ExtractionError::corrupt(e.to_string()))?;

        Ok(docx_xml_to_text(&xml))
    }

    fn parse_pdf(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|e| ExtractionError::corrupt(format!("failed to load PDF: {}", e)))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let pages = page_numbers
            .iter()
            .map(|page| match document.extract_text(&[*page]) {
                Ok(text) => text,
                Err(e) => {
                    debug!("No native text on page {}: {}", page, e);
                    String::new()
                }
            })
            .collect();
        Ok(pages)
    }
}

impl DocumentParser for NativeParser {
    fn parse(&self, bytes: &[u8], format: FileFormat) -> Result<ParsedText, ExtractionError> {
        match format {
            FileFormat::PlainText => Ok(ParsedText::Whole(Self::parse_text(bytes))),
            FileFormat::Csv => Self::parse_csv(bytes).map(ParsedText::Whole),
            FileFormat::Spreadsheet => Self::parse_spreadsheet(bytes).map(ParsedText::Whole),
            FileFormat::WordDocument => Self::parse_docx(bytes).map(ParsedText::Whole),
            FileFormat::Pdf => Self::parse_pdf(bytes).map(ParsedText::Pages),
            other => Err(ExtractionError::new(
                ExtractionErrorKind::UnsupportedFormat,
                format!("no native parser for {}", other.as_str()),
            )),
        }
    }
}

fn docx_xml_to_text(xml: &str) -> String {
    let xml = DOCX_TAB.replace_all(xml, "<w:t>\t</w:t>");
    DOCX_PARAGRAPH_END
        .split(&xml)
        .map(|paragraph| {
            DOCX_TEXT_RUN
                .captures_iter(paragraph)
                .filter_map(|cap| cap.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
