use crate::error::ProcessingError;
use crate::models::{Chunk, ExtractedDocument};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Remote service that converts binary slide decks to per-slide text.
/// Slide decks are the one format the core cannot decode locally.
#[derive(Debug, Clone)]
pub struct SlideConverterConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl SlideConverterConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("SLIDE_CONVERTER_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }
        let api_key = std::env::var("SLIDE_CONVERTER_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Some(Self { endpoint, api_key })
    }
}

#[derive(Debug, Serialize)]
struct SlideConvertRequest {
    deck_base64: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct SlideConvertResponse {
    slides: Option<Vec<SlidePart>>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlidePart {
    #[serde(default)]
    slide: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Dispatches raw bytes to a format-specific extractor, selected by MIME
/// type with an extension fallback and a plain-text decode as last resort.
pub struct ExtractionDispatcher {
    client: reqwest::Client,
    slide_converter: Option<SlideConverterConfig>,
}

impl Default for ExtractionDispatcher {
    fn default() -> Self {
        Self::new(SlideConverterConfig::from_env())
    }
}

impl ExtractionDispatcher {
    pub fn new(slide_converter: Option<SlideConverterConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            slide_converter,
        }
    }

    /// Extracts normalized text and structural metadata. The returned
    /// `source_id` is the SHA-256 of the raw bytes, so re-uploading a
    /// byte-identical file always maps to the same document.
    pub async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<ExtractedDocument, ProcessingError> {
        let source_id = content_hash(bytes);
        let mime_type = guess_mime_type(filename);
        let lowered = filename.to_ascii_lowercase();

        let (text, content_type, structure) = if mime_type == "application/pdf" {
            extract_pdf(bytes, filename)?
        } else if lowered.ends_with(".ipynb") {
            extract_notebook(bytes, filename)?
        } else if lowered.ends_with(".pptx") || lowered.ends_with(".ppt") {
            self.extract_slides(bytes, filename).await?
        } else if is_code_file(&lowered) {
            extract_code(bytes, filename)
        } else {
            let text = std::str::from_utf8(bytes)
                .map_err(|error| ProcessingError::Unsupported {
                    filename: filename.to_string(),
                    reason: format!("not valid utf-8 ({error})"),
                })?
                .to_string();
            (text, None, BTreeMap::new())
        };

        Ok(ExtractedDocument {
            source_id,
            filename: filename.to_string(),
            mime_type,
            text,
            content_type,
            structure,
        })
    }

    async fn extract_slides(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<(String, Option<String>, BTreeMap<String, String>), ProcessingError> {
        let config = self
            .slide_converter
            .as_ref()
            .ok_or_else(|| ProcessingError::Unsupported {
                filename: filename.to_string(),
                reason: "no slide converter endpoint configured".to_string(),
            })?;

        let payload = SlideConvertRequest {
            deck_base64: STANDARD.encode(bytes),
            filename: filename.to_string(),
        };

        let mut request = self.client.post(&config.endpoint).json(&payload);
        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| extraction_error(filename, format!("slide conversion request: {error}")))?;

        if !response.status().is_success() {
            return Err(extraction_error(
                filename,
                format!("slide converter returned {}", response.status()),
            ));
        }

        let parsed: SlideConvertResponse = response
            .json()
            .await
            .map_err(|error| extraction_error(filename, format!("slide conversion payload: {error}")))?;

        let slides = slides_from_response(parsed);
        if slides.is_empty() {
            return Err(extraction_error(
                filename,
                "slide converter returned no readable text".to_string(),
            ));
        }

        let mut text = String::new();
        for (number, body) in &slides {
            let _ = write!(text, "\n\n--- Slide {number} ---\n\n{body}");
        }

        let mut structure = BTreeMap::new();
        structure.insert("slide_count".to_string(), slides.len().to_string());
        Ok((text, Some("slides".to_string()), structure))
    }
}

fn slides_from_response(parsed: SlideConvertResponse) -> Vec<(u32, String)> {
    if let Some(listed) = parsed.slides {
        let listed: Vec<(u32, String)> = listed
            .into_iter()
            .enumerate()
            .filter_map(|(index, part)| {
                let body = part.text.map(|t| t.trim().to_string())?;
                if body.is_empty() {
                    None
                } else {
                    Some((part.slide.unwrap_or(index as u32 + 1), body))
                }
            })
            .collect();
        if !listed.is_empty() {
            return listed;
        }
    }

    parsed
        .text
        .map(|raw| {
            raw.split('\u{000c}')
                .enumerate()
                .filter_map(|(index, part)| {
                    let body = part.trim();
                    if body.is_empty() {
                        None
                    } else {
                        Some((index as u32 + 1, body.to_string()))
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// SHA-256 of the raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn guess_mime_type(filename: &str) -> String {
    let lowered = filename.to_ascii_lowercase();
    let extension = lowered.rsplit('.').next().unwrap_or("");
    let mime = match extension {
        "pdf" => "application/pdf",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "ppt" => "application/vnd.ms-powerpoint",
        "ipynb" | "json" => "application/json",
        "py" => "text/x-python",
        "js" | "ts" => "text/javascript",
        "html" => "text/html",
        "csv" => "text/csv",
        "md" | "txt" => "text/plain",
        _ => "text/plain",
    };
    mime.to_string()
}

fn is_code_file(lowered: &str) -> bool {
    [
        ".py", ".js", ".ts", ".java", ".cpp", ".c", ".cs", ".sql", ".r", ".go", ".rs", ".sh",
        ".rb", ".php",
    ]
    .iter()
    .any(|ext| lowered.ends_with(ext))
}

fn extraction_error(filename: &str, reason: String) -> ProcessingError {
    ProcessingError::Extraction {
        filename: filename.to_string(),
        reason,
    }
}

fn extract_pdf(
    bytes: &[u8],
    filename: &str,
) -> Result<(String, Option<String>, BTreeMap<String, String>), ProcessingError> {
    let document = Document::load_mem(bytes)
        .map_err(|error| extraction_error(filename, format!("pdf parse: {error}")))?;

    let mut text = String::new();
    let mut readable_pages = 0usize;
    let page_count = document.get_pages().len();

    for (page_no, _object_id) in document.get_pages() {
        let page_text = document
            .extract_text(&[page_no])
            .map_err(|error| extraction_error(filename, format!("pdf text: {error}")))?;
        if page_text.trim().is_empty() {
            continue;
        }
        readable_pages += 1;
        let _ = write!(text, "\n\n--- Page {page_no} ---\n\n{}", page_text.trim());
    }

    if readable_pages == 0 {
        return Err(extraction_error(
            filename,
            "pdf had no readable page text".to_string(),
        ));
    }

    let mut structure = BTreeMap::new();
    structure.insert("page_count".to_string(), page_count.to_string());
    structure.insert("readable_pages".to_string(), readable_pages.to_string());
    Ok((text, None, structure))
}

fn extract_notebook(
    bytes: &[u8],
    filename: &str,
) -> Result<(String, Option<String>, BTreeMap<String, String>), ProcessingError> {
    let notebook: Value = serde_json::from_slice(bytes)
        .map_err(|error| extraction_error(filename, format!("notebook parse: {error}")))?;

    let cells = notebook
        .pointer("/cells")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut code_cells = 0usize;
    let mut markdown_cells = 0usize;

    for (index, cell) in cells.iter().enumerate() {
        let cell_type = cell
            .pointer("/cell_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let source = cell_source(cell);

        let _ = write!(text, "\n\n--- Cell {} ({cell_type}) ---\n\n", index + 1);
        match cell_type {
            "markdown" => {
                markdown_cells += 1;
                text.push_str(&source);
            }
            "code" => {
                code_cells += 1;
                let _ = write!(text, "```\n{source}\n```\n");
                let outputs = cell_outputs(cell);
                if !outputs.is_empty() {
                    let _ = write!(text, "\nOutputs:\n{outputs}\n");
                }
            }
            _ => text.push_str(&source),
        }
    }

    let mut structure = BTreeMap::new();
    structure.insert("cell_count".to_string(), cells.len().to_string());
    structure.insert("code_cells".to_string(), code_cells.to_string());
    structure.insert("markdown_cells".to_string(), markdown_cells.to_string());
    if let Some(language) = notebook
        .pointer("/metadata/kernelspec/language")
        .or_else(|| notebook.pointer("/metadata/language_info/name"))
        .and_then(Value::as_str)
    {
        structure.insert("notebook_language".to_string(), language.to_string());
    }

    Ok((text, None, structure))
}

fn cell_source(cell: &Value) -> String {
    match cell.pointer("/source") {
        Some(Value::Array(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        Some(Value::String(source)) => source.clone(),
        _ => String::new(),
    }
}

fn cell_outputs(cell: &Value) -> String {
    let mut collected = String::new();
    let outputs = cell
        .pointer("/outputs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for output in outputs {
        match output.pointer("/output_type").and_then(Value::as_str) {
            Some("stream") => {
                if let Some(text) = output.pointer("/text") {
                    collected.push_str(&flatten_text(text));
                }
            }
            Some("execute_result") | Some("display_data") => {
                if let Some(text) = output.pointer("/data/text~1plain") {
                    collected.push_str(&flatten_text(text));
                }
            }
            _ => {}
        }
    }
    collected
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::Array(lines) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        Value::String(text) => text.clone(),
        _ => String::new(),
    }
}

fn extract_code(bytes: &[u8], filename: &str) -> (String, Option<String>, BTreeMap<String, String>) {
    let code = String::from_utf8_lossy(bytes).to_string();
    let language = code_language(filename);

    let mut structure = BTreeMap::new();
    let lines: Vec<&str> = code.lines().collect();
    structure.insert("line_count".to_string(), lines.len().to_string());

    let comment_prefixes = comment_prefixes(language);
    let comment_lines = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .filter(|line| comment_prefixes.iter().any(|prefix| line.starts_with(prefix)))
        .count();
    structure.insert("comment_lines".to_string(), comment_lines.to_string());

    if let Ok(import_re) = Regex::new(r"(?m)^\s*(?:import|from|use|#include|require)\b") {
        let imports = import_re.find_iter(&code).count();
        structure.insert("import_count".to_string(), imports.to_string());
    }

    let text = if language.is_empty() {
        code
    } else {
        structure.insert("code_language".to_string(), language.to_string());
        format!("```{language}\n{code}\n```")
    };

    (text, Some("code".to_string()), structure)
}

fn code_language(filename: &str) -> &'static str {
    let lowered = filename.to_ascii_lowercase();
    let extension = lowered.rsplit('.').next().unwrap_or("");
    match extension {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "cpp" | "h" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "go" => "go",
        "rb" => "ruby",
        "php" => "php",
        "r" => "r",
        "sql" => "sql",
        "sh" => "bash",
        "rs" => "rust",
        _ => "",
    }
}

fn comment_prefixes(language: &str) -> &'static [&'static str] {
    match language {
        "python" | "ruby" | "r" | "bash" => &["#"],
        "sql" => &["--", "/*"],
        "php" => &["//", "#", "/*"],
        "" => &[],
        _ => &["//", "/*"],
    }
}

/// Builds the provenance-prefixed text sent to the embedding provider.
/// Bare chunk content loses disambiguating context when two courses cover
/// the same topic, so course, source, and section context ride along.
pub fn vectorization_text(chunk: &Chunk) -> String {
    let meta = &chunk.metadata;
    let course_name = meta.course_name.as_deref().unwrap_or("");
    let course_id = meta.course_id.as_deref().unwrap_or("");
    let heading = meta
        .heading
        .as_deref()
        .map(str::to_string)
        .or_else(|| meta.slide_number.map(|n| format!("Slide {n}")))
        .unwrap_or_default();

    format!(
        "Course: {course_name} ({course_id})\nSource: {}\nHeading: {heading}\nType: {}\nContent: {}",
        meta.source,
        meta.chunk_type.as_str(),
        chunk.content,
    )
}
