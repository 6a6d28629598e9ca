//! Document text extraction (PDF, DOCX).
//!
//! Extraction is a strategy: each [`Extractor`] turns the raw bytes of one
//! format into UTF-8 text plus document properties, and the
//! [`ExtractorRegistry`] dispatches by lowercase file extension. Supporting a
//! new format means registering another extractor; the ingestion pipeline
//! does not change.
//!
//! Malformed input is reported as [`ExtractError`] and the pipeline skips
//! the file.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use compliance_rag_core::models::MetadataValue;
use compliance_rag_core::Error;
use lopdf::Object;
use quick_xml::events::Event;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// PDF info-dictionary keys copied into document properties.
const PDF_INFO_KEYS: [(&[u8], &str); 5] = [
    (b"Title", "title"),
    (b"Author", "author"),
    (b"Subject", "subject"),
    (b"Keywords", "keywords"),
    (b"Creator", "creator"),
];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Text and format-specific properties of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDocument {
    pub text: String,
    pub properties: BTreeMap<String, MetadataValue>,
}

/// Converts the bytes of one document format into text.
pub trait Extractor: Send + Sync {
    /// Short format name used in logs.
    fn name(&self) -> &'static str;

    /// Lowercase extensions (without the dot) this extractor handles.
    fn extensions(&self) -> &[&'static str];

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, ExtractError>;
}

/// PDF text via `pdf-extract`, page count and info dictionary via `lopdf`.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, ExtractError> {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let properties = match lopdf::Document::load_mem(bytes) {
            Ok(doc) => pdf_properties(&doc),
            Err(e) => {
                tracing::debug!(error = %e, "lopdf could not read document info");
                BTreeMap::new()
            }
        };
        Ok(ExtractedDocument { text, properties })
    }
}

fn pdf_properties(doc: &lopdf::Document) -> BTreeMap<String, MetadataValue> {
    let mut props = BTreeMap::new();
    props.insert(
        "page_count".to_string(),
        MetadataValue::from(doc.get_pages().len()),
    );

    let info = doc.trailer.get(b"Info").and_then(|obj| match obj {
        Object::Reference(id) => doc.get_dictionary(*id),
        other => other.as_dict(),
    });
    if let Ok(info) = info {
        for (key, name) in PDF_INFO_KEYS {
            let value = info
                .get(key)
                .ok()
                .and_then(|o| o.as_str().ok())
                .map(decode_pdf_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            if let Some(value) = value {
                props.insert(name.to_string(), MetadataValue::Str(value));
            }
        }
    }
    props
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte-per-char.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// DOCX body text from `word/document.xml`, one line per paragraph.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn extensions(&self) -> &[&'static str] {
        &["docx"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, ExtractError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let paragraphs = docx_paragraphs(&xml)?;

        let mut properties = BTreeMap::new();
        properties.insert(
            "paragraph_count".to_string(),
            MetadataValue::from(paragraphs.len()),
        );
        Ok(ExtractedDocument {
            text: paragraphs.join("\n"),
            properties,
        })
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Collect the text of every `w:p`, concatenating its `w:t` runs.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

/// Extractors keyed by lowercase file extension.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in PDF and DOCX extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfExtractor));
        registry.register(Arc::new(DocxExtractor));
        registry
    }

    /// Register `extractor` for each of its extensions, replacing any
    /// previous registration.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_extension
                .insert(ext.to_ascii_lowercase(), Arc::clone(&extractor));
        }
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Extractor>> {
        self.by_extension
            .get(&extension.trim_start_matches('.').to_ascii_lowercase())
            .cloned()
    }

    /// Extractor for `path`'s extension, if any.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Extractor>> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.get(e))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Read and extract one file.
    ///
    /// Fails with `UnsupportedFormat` when no extractor matches and with
    /// `Extraction` when reading or parsing fails.
    pub fn extract_file(&self, path: &Path) -> compliance_rag_core::Result<ExtractedDocument> {
        let extractor = self.for_path(path).ok_or_else(|| {
            Error::UnsupportedFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;
        let bytes = std::fs::read(path)
            .map_err(|e| Error::extraction(path.display().to_string(), e.to_string()))?;
        extractor
            .extract(&bytes)
            .map_err(|e| Error::extraction(path.display().to_string(), e.to_string()))
    }
}
