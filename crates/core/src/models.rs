use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed vocabulary of chunk kinds produced by the segmenter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    CodeHeader,
    CodeFunction,
    CodeFooter,
    SlideHeader,
    Slide,
    PreHeading,
    Section,
    HeadingOnly,
    FinalSection,
    ParagraphGroup,
    LargeParagraphSegment,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::CodeHeader => "code_header",
            ChunkType::CodeFunction => "code_function",
            ChunkType::CodeFooter => "code_footer",
            ChunkType::SlideHeader => "slide_header",
            ChunkType::Slide => "slide",
            ChunkType::PreHeading => "pre_heading",
            ChunkType::Section => "section",
            ChunkType::HeadingOnly => "heading_only",
            ChunkType::FinalSection => "final_section",
            ChunkType::ParagraphGroup => "paragraph_group",
            ChunkType::LargeParagraphSegment => "large_paragraph_segment",
        }
    }
}

/// Metadata carried by every chunk. `source` and `source_id` point back at
/// the uploaded artifact; `extra` holds extractor-specific structural fields
/// (page counts, notebook kernel, code language).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
    pub source_id: String,
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            chunk_type: ChunkType::ParagraphGroup,
            content_type: None,
            mime_type: None,
            course_id: None,
            course_name: None,
            module_id: None,
            topic_id: None,
            heading: None,
            heading_level: None,
            slide_number: None,
            function_name: None,
            page_number: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_type(&self, chunk_type: ChunkType) -> Self {
        let mut meta = self.clone();
        meta.chunk_type = chunk_type;
        meta
    }
}

/// Atomic retrievable unit. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }
}

/// Course/module/topic associations owned by the caller; opaque to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseContext {
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub module_id: Option<String>,
    pub topic_id: Option<String>,
}

/// Output of the extraction dispatcher: normalized text plus structural
/// metadata, keyed by a content hash of the raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub source_id: String,
    pub filename: String,
    pub mime_type: String,
    pub text: String,
    pub content_type: Option<String>,
    pub structure: BTreeMap<String, String>,
}

/// A record as handed to the vector store. The payload carries the chunk
/// content and flattened metadata for filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
}

/// Equality constraints applied at search/delete time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilter {
    pub equals: BTreeMap<String, String>,
}

impl SearchFilter {
    pub fn course(course_id: impl Into<String>) -> Self {
        let mut equals = BTreeMap::new();
        equals.insert("course_id".to_string(), course_id.into());
        Self { equals }
    }

    pub fn source(source_id: impl Into<String>) -> Self {
        let mut equals = BTreeMap::new();
        equals.insert("source_id".to_string(), source_id.into());
        Self { equals }
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(SearchFilter),
}

/// Distance metric for a collection. Cosine is the only one the pipeline
/// creates, but the store layer passes it through verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Dot => "Dot",
            DistanceMetric::Euclidean => "Euclid",
        }
    }
}

/// Retriever output: one chunk with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self {
            progress: 0.0,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// Bookkeeping record persisted to the external document store, keyed by
/// `material_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub material_type: String,
    pub course_id: Option<String>,
    pub module_id: Option<String>,
    pub topic_id: Option<String>,
    pub file_url: Option<String>,
    pub file_size: u64,
    pub file_type: String,
    pub status: JobStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub chunk_count: u64,
    pub vector_ids: Vec<String>,
}

impl MaterialRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, file_type: impl Into<String>) -> Self {
        let now = Utc::now();
        let file_type = file_type.into();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            material_type: file_type.clone(),
            course_id: None,
            module_id: None,
            topic_id: None,
            file_url: None,
            file_size: 0,
            file_type,
            status: JobStatus::Queued,
            uploaded_at: now,
            updated_at: now,
            processing_status: ProcessingStatus::default(),
            chunk_count: 0,
            vector_ids: Vec::new(),
        }
    }
}

/// Partial-field update applied to a material record. `None` fields are
/// left untouched by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub chunk_count: Option<u64>,
    pub vector_ids: Option<Vec<String>>,
}

impl MaterialUpdate {
    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }
}
