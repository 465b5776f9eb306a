// file: src/extraction/format.rs
// description: file format detection from extension and magic bytes
// reference: https://docs.rs/zip

use crate::models::FileFormat;
use std::io::Cursor;

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const IMAGE_MAGIC: [&[u8]; 7] = [
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"GIF87a",
    b"GIF89a",
    b"BM",
    b"II*\x00",
    b"MM\x00*",
];

pub fn format_from_extension(extension: &str) -> Option<FileFormat> {
    let format = match extension.trim_start_matches('.').to_lowercase().as_str() {
        "txt" | "text" | "md" | "log" => FileFormat::PlainText,
        "csv" | "tsv" => FileFormat::Csv,
        "xlsx" | "xlsm" | "xls" | "ods" => FileFormat::Spreadsheet,
        "docx" => FileFormat::WordDocument,
        "pdf" => FileFormat::Pdf,
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" => FileFormat::Image,
        "pptx" | "ppt" => FileFormat::Presentation,
        "doc" => FileFormat::Unknown,
        _ => return None,
    };
    Some(format)
}

pub fn format_from_magic(bytes: &[u8]) -> FileFormat {
    if bytes.starts_with(PDF_MAGIC) {
        return FileFormat::Pdf;
    }
    if IMAGE_MAGIC.iter().any(|magic| bytes.starts_with(magic)) {
        return FileFormat::Image;
    }
    if bytes.starts_with(ZIP_MAGIC) {
        return zip_container_format(bytes);
    }
    if looks_like_text(bytes) {
        return FileFormat::PlainText;
    }
    FileFormat::Unknown
}

/// Extension first, then content sniffing.
pub fn detect_format(extension: &str, bytes: &[u8]) -> FileFormat {
    format_from_extension(extension).unwrap_or_else(|| format_from_magic(bytes))
}

fn zip_container_format(bytes: &[u8]) -> FileFormat {
    let Ok(archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return FileFormat::Unknown;
    };

    let mut format = FileFormat::Unknown;
    for name in archive.file_names() {
        if name.starts_with("word/") {
            format = FileFormat::WordDocument;
            break;
        } else if name.starts_with("xl/") {
            format = FileFormat::Spreadsheet;
            break;
        } else if name.starts_with("ppt/") {
            format = FileFormat::Presentation;
            break;
        }
    }
    format
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let sample = &bytes[..bytes.len().min(4096)];
    if sample.contains(&0) {
        return false;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // A multi-byte character may straddle the sample boundary.
        Err(e) => e.error_len().is_none(),
    }
}
