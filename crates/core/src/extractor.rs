use crate::chunking::normalize_whitespace;
use crate::error::ExtractionError;
use crate::models::{DocumentKind, SourceDocument, TextUnit};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Lazily produced text units of one document. Calling `extract` again on the
/// same document restarts the sequence.
pub type TextUnits = Box<dyn Iterator<Item = Result<TextUnit, ExtractionError>> + Send>;

pub trait DocumentExtractor: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Lowercase file extensions this extractor accepts, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn extract(&self, document: &SourceDocument) -> Result<TextUnits, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Page-by-page PDF text via `lopdf`, with an optional multimodal OCR
/// endpoint for files `lopdf` cannot open.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    ocr: Option<OcrEndpointConfig>,
}

impl PdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ocr_fallback(ocr: OcrEndpointConfig) -> Self {
        Self { ocr: Some(ocr) }
    }
}

impl DocumentExtractor for PdfExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn extract(&self, document: &SourceDocument) -> Result<TextUnits, ExtractionError> {
        match Document::load(&document.path) {
            Ok(pdf) => {
                let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
                debug!(path = %document.path.display(), pages = page_numbers.len(), "opened pdf");
                Ok(Box::new(PdfPages {
                    pdf,
                    pages: page_numbers.into_iter(),
                    document: document.clone(),
                }))
            }
            Err(parse_error) => {
                let Some(ocr) = &self.ocr else {
                    return Err(ExtractionError::new(&document.path, parse_error));
                };
                let pages = extract_with_llm_ocr(ocr, document).map_err(|ocr_error| {
                    ExtractionError::new(
                        &document.path,
                        format!("{parse_error}; multimodal OCR fallback failed: {ocr_error}"),
                    )
                })?;
                Ok(Box::new(pages.into_iter().map(Ok)))
            }
        }
    }
}

struct PdfPages {
    pdf: Document,
    pages: std::vec::IntoIter<u32>,
    document: SourceDocument,
}

impl Iterator for PdfPages {
    type Item = Result<TextUnit, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = self.pages.next()?;
            let text = match self.pdf.extract_text(&[page]) {
                Ok(text) => normalize_whitespace(&text),
                Err(error) => {
                    return Some(Err(ExtractionError::new(
                        &self.document.path,
                        format!("page {page}: {error}"),
                    )))
                }
            };

            if !text.is_empty() {
                return Some(Ok(TextUnit {
                    text,
                    locator: self.document.locator(page),
                }));
            }
        }
    }
}

/// `.txt` and `.md` files; a form feed starts a new page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::PlainText
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md"]
    }

    fn extract(&self, document: &SourceDocument) -> Result<TextUnits, ExtractionError> {
        let raw = std::fs::read_to_string(&document.path)
            .map_err(|error| ExtractionError::new(&document.path, error))?;
        let document = document.clone();

        let units: Vec<TextUnit> = split_form_feed_pages(&raw)
            .into_iter()
            .map(|(page, text)| TextUnit {
                text: normalize_whitespace(&text),
                locator: document.locator(page),
            })
            .collect();

        Ok(Box::new(units.into_iter().map(Ok)))
    }
}

/// Maps document kinds to their extractors and file extensions to kinds.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentKind, Arc<dyn DocumentExtractor>>,
    extension_map: HashMap<&'static str, DocumentKind>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: DocumentExtractor + 'static>(&mut self, extractor: E) {
        let kind = extractor.kind();
        for extension in extractor.extensions() {
            self.extension_map.insert(*extension, kind);
        }
        self.extractors.insert(kind, Arc::new(extractor));
    }

    pub fn kind_for_path(&self, path: &Path) -> Option<DocumentKind> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extension_map.get(extension.as_str()).copied()
    }

    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<_> = self.extension_map.keys().copied().collect();
        extensions.sort_unstable();
        extensions
    }

    pub fn extract(&self, document: &SourceDocument) -> Result<TextUnits, ExtractionError> {
        let extractor = self.extractors.get(&document.kind).ok_or_else(|| {
            ExtractionError::new(
                &document.path,
                format!("no extractor registered for {:?}", document.kind),
            )
        })?;
        extractor.extract(document)
    }
}

fn split_form_feed_pages(raw: &str) -> Vec<(u32, String)> {
    raw.split('\u{000c}')
        .enumerate()
        .filter_map(|(index, chunk)| {
            let trimmed = chunk.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(((index + 1) as u32, trimmed.to_string()))
            }
        })
        .collect()
}

fn extract_with_llm_ocr(
    config: &OcrEndpointConfig,
    document: &SourceDocument,
) -> Result<Vec<TextUnit>, String> {
    let pdf = std::fs::read(&document.path).map_err(|error| error.to_string())?;
    let payload = LlmOcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: document.path.to_string_lossy().to_string(),
    };

    let mut request = Client::new()
        .post(&config.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &config.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().map_err(|error| error.to_string())?;

    if !response.status().is_success() {
        return Err(format!(
            "multimodal OCR request to {} returned {}",
            config.endpoint,
            response.status()
        ));
    }

    let payload: LlmOcrResponse = response.json().map_err(|error| error.to_string())?;
    let pages = payload_to_pages(&payload);

    if pages.is_empty() {
        return Err(format!(
            "multimodal OCR response has no readable text: {}",
            document.path.display()
        ));
    }

    Ok(pages
        .into_iter()
        .map(|(page, text)| TextUnit {
            text: normalize_whitespace(&text),
            locator: document.locator(page),
        })
        .collect())
}

fn payload_to_pages(payload: &LlmOcrResponse) -> Vec<(u32, String)> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    None
                } else {
                    Some((page.page.unwrap_or(1), text.to_string()))
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return listed;
        }
    }

    payload
        .text
        .as_deref()
        .map(split_form_feed_pages)
        .unwrap_or_default()
}
