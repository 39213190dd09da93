use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};

/// Provenance pointer handed to the answering layer alongside the
/// assembled context block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub source_id: String,
    pub source_name: String,
    pub course_id: Option<String>,
    pub location: Option<String>,
}

/// Where inside the source this chunk came from: a page, a heading, or
/// a slide, whichever the metadata carries.
fn chunk_location(chunk: &RetrievedChunk) -> Option<String> {
    let meta = &chunk.chunk.metadata;
    if let Some(page) = meta.page_number {
        return Some(format!("page {page}"));
    }
    if let Some(slide) = meta.slide_number {
        return Some(format!("slide {slide}"));
    }
    meta.heading.clone()
}

/// Renders ranked fragments into a numbered, provenance-tagged context
/// block plus one citation per fragment. Input order is preserved.
pub fn build_context(chunks: &[RetrievedChunk]) -> (String, Vec<Citation>) {
    let mut block = String::new();
    let mut citations = Vec::with_capacity(chunks.len());

    for (index, retrieved) in chunks.iter().enumerate() {
        let meta = &retrieved.chunk.metadata;
        let course = meta
            .course_name
            .as_deref()
            .or(meta.course_id.as_deref())
            .unwrap_or("unknown course");

        if !block.is_empty() {
            block.push_str("\n\n");
        }
        block.push_str(&format!(
            "[{}] From {} ({}):\n{}",
            index + 1,
            meta.source,
            course,
            retrieved.chunk.content.trim()
        ));

        citations.push(Citation {
            source_id: meta.source_id.clone(),
            source_name: meta.source.clone(),
            course_id: meta.course_id.clone(),
            location: chunk_location(retrieved),
        });
    }

    (block, citations)
}
