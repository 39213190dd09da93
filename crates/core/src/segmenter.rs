use crate::models::{Chunk, ChunkMetadata, ChunkType};
use regex::Regex;

#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// Segmentation strategies, evaluated in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Code,
    Slide,
    Heading,
    Paragraph,
}

const CODE_MIME_TYPES: [&str; 3] = ["text/x-python", "text/javascript", "application/json"];
const CODE_EXTENSIONS: [&str; 12] = [
    ".py", ".js", ".ts", ".java", ".cpp", ".c", ".cs", ".sql", ".r", ".go", ".rs", ".ipynb",
];
const SLIDE_MIME_TYPES: [&str; 2] = [
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-powerpoint",
];
const SLIDE_EXTENSIONS: [&str; 2] = [".pptx", ".ppt"];

const SLIDE_MARKER: &str = r"(?m)^[-=]{3,}\s*Slide\s+(\d+)\s*[-=]{3,}\s*$";
const PAGE_MARKER: &str = r"^[-=]{3,}\s*Page\s+(\d+)\s*[-=]{3,}\s*$";
const HEADING_LINE: &str = r"(?m)^((?:#{1,6}|\d+\.(?:\d+\.)*)[ \t]+[^\n]+)";

/// Definition-boundary patterns across the languages course code shows up in.
const DEFINITION_PATTERNS: [&str; 4] = [
    r"(?m)^(?:def|class)\s+\w+",
    r"(?m)^(?:export\s+)?(?:function|class)\s+\w+",
    r"(?m)^(?:public|private|protected)\s+(?:static\s+)?[\w<>\[\]]+\s+\w+\s*\(",
    r"(?m)^(?:pub(?:\(crate\))?\s+)?(?:fn|struct|enum|trait|impl)\s+\w+",
];

/// Picks the strategy for a piece of content. First match wins; the
/// paragraph strategy is the unconditional default.
pub fn select_strategy(text: &str, metadata: &ChunkMetadata) -> Strategy {
    if is_code_content(metadata) {
        Strategy::Code
    } else if is_slide_content(metadata) {
        Strategy::Slide
    } else if has_heading_structure(text) {
        Strategy::Heading
    } else {
        Strategy::Paragraph
    }
}

/// Splits `text` into ordered chunks. Deterministic and side-effect free:
/// the same input yields the same chunk contents in the same order (ids are
/// freshly generated). Non-blank input always yields at least one chunk.
pub fn segment(text: &str, metadata: &ChunkMetadata, config: &SegmenterConfig) -> Vec<Chunk> {
    let chunks = match select_strategy(text, metadata) {
        Strategy::Code => chunk_by_definition(text, metadata, config)
            .unwrap_or_else(|_| chunk_by_paragraph(text, metadata, config)),
        Strategy::Slide => chunk_by_slide(text, metadata, config)
            .unwrap_or_else(|_| chunk_by_paragraph(text, metadata, config)),
        Strategy::Heading => chunk_by_heading(text, metadata, config)
            .unwrap_or_else(|_| chunk_by_paragraph(text, metadata, config)),
        Strategy::Paragraph => chunk_by_paragraph(text, metadata, config),
    };

    let chunks = if chunks.is_empty() && !text.trim().is_empty() {
        vec![Chunk::new(
            text.trim(),
            metadata.with_type(ChunkType::ParagraphGroup),
        )]
    } else {
        chunks
    };

    assign_page_numbers(chunks)
}

/// Pulls extractor-embedded `--- Page N ---` markers out of chunk content
/// and into `page_number`. A chunk spanning several pages keeps the first
/// page it starts on; chunks left empty after stripping are dropped.
fn assign_page_numbers(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let Ok(marker_re) = Regex::new(PAGE_MARKER) else {
        return chunks;
    };

    chunks
        .into_iter()
        .filter_map(|mut chunk| {
            let mut page_number: Option<u32> = None;
            let mut stripped = false;

            let rebuilt = chunk
                .content
                .lines()
                .filter(|line| match marker_re.captures(line.trim()) {
                    Some(captures) => {
                        if page_number.is_none() {
                            page_number = captures.get(1).and_then(|m| m.as_str().parse().ok());
                        }
                        stripped = true;
                        false
                    }
                    None => true,
                })
                .collect::<Vec<_>>()
                .join("\n");

            if stripped {
                chunk.content = rebuilt.trim_matches('\n').to_string();
                if chunk.metadata.page_number.is_none() {
                    chunk.metadata.page_number = page_number;
                }
            }

            if chunk.content.trim().is_empty() {
                None
            } else {
                Some(chunk)
            }
        })
        .collect()
}

fn is_code_content(metadata: &ChunkMetadata) -> bool {
    let mime = metadata.mime_type.as_deref().unwrap_or("");
    let filename = metadata.source.to_ascii_lowercase();

    CODE_MIME_TYPES.iter().any(|kind| mime.starts_with(kind))
        || CODE_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
        || metadata.content_type.as_deref() == Some("code")
}

fn is_slide_content(metadata: &ChunkMetadata) -> bool {
    let mime = metadata.mime_type.as_deref().unwrap_or("");
    let filename = metadata.source.to_ascii_lowercase();

    SLIDE_MIME_TYPES.iter().any(|kind| mime == *kind)
        || SLIDE_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
        || metadata.content_type.as_deref() == Some("slides")
}

fn has_heading_structure(text: &str) -> bool {
    let Ok(heading_re) = Regex::new(HEADING_LINE) else {
        return false;
    };
    heading_re.find_iter(text).count() >= 2
}

fn chunk_by_definition(
    text: &str,
    metadata: &ChunkMetadata,
    config: &SegmenterConfig,
) -> Result<Vec<Chunk>, regex::Error> {
    let mut starts = Vec::new();
    for pattern in DEFINITION_PATTERNS {
        let re = Regex::new(pattern)?;
        starts.extend(re.find_iter(text).map(|m| m.start()));
    }
    starts.sort_unstable();
    starts.dedup();

    if starts.is_empty() {
        return Ok(chunk_by_paragraph(text, metadata, config));
    }

    let name_re = Regex::new(r"(?:def|class|function|fn|struct|enum|trait|impl)\s+(\w+)")?;
    let mut chunks = Vec::new();

    if starts[0] > 0 {
        let header = &text[..starts[0]];
        if !header.trim().is_empty() {
            chunks.push(Chunk::new(header, metadata.with_type(ChunkType::CodeHeader)));
        }
    }

    let mut current_pos = 0;
    for (index, &pos) in starts.iter().enumerate() {
        let next_pos = starts.get(index + 1).copied().unwrap_or(text.len());
        let body = &text[pos..next_pos];
        if !body.trim().is_empty() {
            let mut meta = metadata.with_type(ChunkType::CodeFunction);
            if let Some(name) = name_re.captures(body).and_then(|c| c.get(1)) {
                meta.function_name = Some(name.as_str().to_string());
            }
            chunks.push(Chunk::new(body, meta));
        }
        current_pos = next_pos;
    }

    if current_pos < text.len() {
        let footer = &text[current_pos..];
        if !footer.trim().is_empty() {
            chunks.push(Chunk::new(footer, metadata.with_type(ChunkType::CodeFooter)));
        }
    }

    Ok(chunks)
}

fn chunk_by_slide(
    text: &str,
    metadata: &ChunkMetadata,
    config: &SegmenterConfig,
) -> Result<Vec<Chunk>, regex::Error> {
    let marker_re = Regex::new(SLIDE_MARKER)?;

    struct Marker {
        start: usize,
        end: usize,
        number: u32,
    }

    let markers: Vec<Marker> = marker_re
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let number = captures.get(1)?.as_str().parse().ok()?;
            Some(Marker {
                start: whole.start(),
                end: whole.end(),
                number,
            })
        })
        .collect();

    if markers.is_empty() {
        return Ok(chunk_by_paragraph(text, metadata, config));
    }

    let mut chunks = Vec::new();

    let preamble = &text[..markers[0].start];
    if !preamble.trim().is_empty() {
        chunks.push(Chunk::new(preamble, metadata.with_type(ChunkType::SlideHeader)));
    }

    for (index, marker) in markers.iter().enumerate() {
        let end = markers
            .get(index + 1)
            .map(|next| next.start)
            .unwrap_or(text.len());
        let body = &text[marker.end..end];
        if !body.trim().is_empty() {
            let mut meta = metadata.with_type(ChunkType::Slide);
            meta.slide_number = Some(marker.number);
            chunks.push(Chunk::new(body, meta));
        }
    }

    Ok(chunks)
}

fn chunk_by_heading(
    text: &str,
    metadata: &ChunkMetadata,
    config: &SegmenterConfig,
) -> Result<Vec<Chunk>, regex::Error> {
    let heading_re = Regex::new(HEADING_LINE)?;
    let headings: Vec<(usize, usize, String)> = heading_re
        .find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect();

    if headings.is_empty() {
        return Ok(chunk_by_paragraph(text, metadata, config));
    }

    let mut chunks = Vec::new();
    let mut current_pos = 0;
    let mut current_heading = String::new();
    let mut current_level = 0u32;

    for (index, (start, end, heading)) in headings.iter().enumerate() {
        let level = heading_level(heading);

        if index == 0 {
            if *start > 0 {
                let lead = &text[..*start];
                if !lead.trim().is_empty() {
                    chunks.push(Chunk::new(lead, metadata.with_type(ChunkType::PreHeading)));
                }
            }
        } else {
            let body = &text[current_pos..*start];
            if !body.trim().is_empty() {
                if current_heading.is_empty() {
                    // Body that followed a standalone oversized heading.
                    chunks.push(Chunk::new(body, metadata.with_type(ChunkType::Section)));
                } else {
                    let mut meta = metadata.with_type(ChunkType::Section);
                    meta.heading = Some(current_heading.trim().to_string());
                    meta.heading_level = Some(current_level);
                    chunks.push(Chunk::new(
                        format!("{}\n{}", current_heading.trim_end(), body.trim_matches('\n')),
                        meta,
                    ));
                }
            }
        }

        current_pos = *end;
        current_heading = heading.clone();
        current_level = level;

        // Oversized headings become standalone chunks so they are never
        // truncated away inside a section body.
        if heading.len() > config.chunk_size / 2 {
            let mut meta = metadata.with_type(ChunkType::HeadingOnly);
            meta.heading = Some(heading.trim().to_string());
            meta.heading_level = Some(level);
            chunks.push(Chunk::new(heading.as_str(), meta));
            current_heading = String::new();
        }
    }

    if current_pos < text.len() {
        let tail = &text[current_pos..];
        if !tail.trim().is_empty() {
            if current_heading.is_empty() {
                chunks.push(Chunk::new(tail, metadata.with_type(ChunkType::FinalSection)));
            } else {
                let mut meta = metadata.with_type(ChunkType::Section);
                meta.heading = Some(current_heading.trim().to_string());
                meta.heading_level = Some(current_level);
                chunks.push(Chunk::new(
                    format!("{}\n{}", current_heading.trim_end(), tail.trim_matches('\n')),
                    meta,
                ));
            }
        }
    }

    Ok(chunks)
}

fn heading_level(heading: &str) -> u32 {
    let trimmed = heading.trim_start();
    if trimmed.starts_with('#') {
        trimmed.chars().take_while(|c| *c == '#').count() as u32
    } else {
        trimmed
            .split_whitespace()
            .next()
            .map(|prefix| prefix.matches('.').count() as u32)
            .unwrap_or(1)
    }
}

fn chunk_by_paragraph(text: &str, metadata: &ChunkMetadata, config: &SegmenterConfig) -> Vec<Chunk> {
    let paragraphs: Vec<&str> = split_paragraphs(text);
    let chunk_size = config.chunk_size.max(1);
    let step = chunk_size.saturating_sub(config.chunk_overlap).max(1);

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0usize;

    let flush = |current: &mut Vec<String>, current_size: &mut usize, chunks: &mut Vec<Chunk>| {
        if !current.is_empty() {
            chunks.push(Chunk::new(
                current.join("\n\n"),
                metadata.with_type(ChunkType::ParagraphGroup),
            ));
            current.clear();
            *current_size = 0;
        }
    };

    for paragraph in paragraphs {
        let paragraph_size = paragraph.len();

        if current_size + paragraph_size > chunk_size && !current.is_empty() {
            chunks.push(Chunk::new(
                current.join("\n\n"),
                metadata.with_type(ChunkType::ParagraphGroup),
            ));
            if config.chunk_overlap > 0 && current.len() > 1 {
                // Reseed with the trailing paragraph for overlap.
                let last = current
                    .pop()
                    .unwrap_or_default();
                current.clear();
                current_size = last.len();
                current.push(last);
            } else {
                current.clear();
                current_size = 0;
            }
        }

        if paragraph_size > chunk_size {
            flush(&mut current, &mut current_size, &mut chunks);

            let chars: Vec<char> = paragraph.chars().collect();
            let mut start = 0;
            while start < chars.len() {
                let end = (start + chunk_size).min(chars.len());
                let window: String = chars[start..end].iter().collect();
                chunks.push(Chunk::new(
                    window,
                    metadata.with_type(ChunkType::LargeParagraphSegment),
                ));
                if end == chars.len() {
                    break;
                }
                start += step;
            }
        } else {
            current.push(paragraph.to_string());
            current_size += paragraph_size;
        }
    }

    flush(&mut current, &mut current_size, &mut chunks);
    chunks
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut rest = text;

    while let Some(found) = find_blank_line(rest) {
        let (head, tail) = rest.split_at(found.0);
        let trimmed = head.trim();
        if !trimmed.is_empty() {
            paragraphs.push(trimmed);
        }
        rest = &tail[found.1..];
    }

    let trimmed = rest.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed);
    }

    paragraphs
}

// Locates the next blank-line separator (newline, optional horizontal
// whitespace, newline) and returns (offset, separator length).
fn find_blank_line(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\n' {
            let mut cursor = index + 1;
            while cursor < bytes.len() && (bytes[cursor] == b' ' || bytes[cursor] == b'\t' || bytes[cursor] == b'\r')
            {
                cursor += 1;
            }
            if cursor < bytes.len() && bytes[cursor] == b'\n' {
                return Some((index, cursor + 1 - index));
            }
        }
        index += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ChunkMetadata {
        ChunkMetadata::new("notes.txt", "deadbeef")
    }

    fn config(chunk_size: usize, chunk_overlap: usize) -> SegmenterConfig {
        SegmenterConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let first = segment(text, &meta(), &config(30, 0));
        let second = segment(text, &meta(), &config(30, 0));

        let contents = |chunks: &[Chunk]| {
            chunks
                .iter()
                .map(|c| c.content.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(contents(&first), contents(&second));
        assert!(!first.is_empty());
    }

    #[test]
    fn paragraph_chunks_cover_the_input() {
        let text = "Alpha paragraph.\n\nBeta paragraph with more words in it.\n\nGamma.";
        let chunks = segment(text, &meta(), &config(40, 0));

        let rebuilt = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let expected = split_paragraphs(text).join("\n\n");
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn paragraph_chunks_respect_size_bound() {
        let text = "one two three four five.\n\nsix seven eight nine ten.\n\neleven twelve.";
        let chunks = segment(text, &meta(), &config(30, 0));

        for chunk in &chunks {
            assert!(
                chunk.content.len() <= 30 + 4,
                "chunk too large: {}",
                chunk.content.len()
            );
        }
    }

    #[test]
    fn oversized_paragraph_is_hard_split_into_windows() {
        let long = "x".repeat(120);
        let chunks = segment(&long, &meta(), &config(50, 10));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 50);
            assert_eq!(chunk.metadata.chunk_type, ChunkType::LargeParagraphSegment);
        }
        // Windows overlap by chunk_overlap, stepping by size - overlap.
        assert_eq!(chunks[0].content.len(), 50);
    }

    #[test]
    fn overlap_reseeds_with_last_paragraph() {
        let text = "aaaa aaaa aaaa.\n\nbbbb bbbb bbbb.\n\ncccc cccc cccc.";
        let chunks = segment(text, &meta(), &config(34, 10));

        assert!(chunks.len() >= 2);
        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let last_paragraph_of_first = first.split("\n\n").last().unwrap();
        assert!(second.starts_with(last_paragraph_of_first));
    }

    #[test]
    fn page_markers_move_into_metadata_and_out_of_content() {
        let text = "\n\n--- Page 1 ---\n\nIntroduction to the course and its goals.\n\n--- Page 2 ---\n\nGradient descent, explained with pictures.";
        let chunks = segment(text, &meta(), &config(60, 0));

        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.content.contains("--- Page")));
        assert!(chunks.iter().any(|c| c.metadata.page_number == Some(1)));
        assert!(chunks.iter().any(|c| c.metadata.page_number == Some(2)));
    }

    #[test]
    fn chunks_without_markers_keep_page_number_unset() {
        let text = "Plain paragraph one.\n\nPlain paragraph two.";
        let chunks = segment(text, &meta(), &SegmenterConfig::default());
        assert!(chunks.iter().all(|c| c.metadata.page_number.is_none()));
    }

    #[test]
    fn two_markdown_headings_select_heading_strategy() {
        let text = "Course intro spanning a few lines.\nMore intro.\n\n# Basics\nContent about basics.\n\n# Advanced\nContent about advanced topics.";
        assert_eq!(select_strategy(text, &meta()), Strategy::Heading);

        let chunks = segment(text, &meta(), &SegmenterConfig::default());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::PreHeading);
        assert_eq!(chunks[1].metadata.chunk_type, ChunkType::Section);
        assert_eq!(chunks[1].metadata.heading.as_deref(), Some("# Basics"));
        assert_eq!(chunks[1].metadata.heading_level, Some(1));
        assert_eq!(chunks[2].metadata.chunk_type, ChunkType::Section);
        assert_eq!(chunks[2].metadata.heading.as_deref(), Some("# Advanced"));
    }

    #[test]
    fn numbered_outline_headings_carry_levels() {
        let text = "1. Intro\nIntro body.\n2.1. Detail\nDetail body.";
        let chunks = segment(text, &meta(), &SegmenterConfig::default());

        let section = chunks
            .iter()
            .find(|c| c.metadata.heading.as_deref() == Some("2.1. Detail"))
            .expect("numbered section present");
        assert_eq!(section.metadata.heading_level, Some(2));
    }

    #[test]
    fn oversized_heading_becomes_standalone_chunk() {
        let heading = format!("# {}", "very long heading ".repeat(4));
        let text = format!("{heading}\nbody text\n# Short\nmore body\n# Other\ntail");
        let chunks = segment(&text, &meta(), &config(40, 0));

        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == ChunkType::HeadingOnly));
    }

    #[test]
    fn slide_markers_produce_one_chunk_per_slide() {
        let mut slide_meta = meta();
        slide_meta.content_type = Some("slides".to_string());
        let text = "Deck title page\n\n--- Slide 1 ---\nWhat is ML?\n\n--- Slide 2 ---\nSupervised learning.";

        let chunks = segment(text, &slide_meta, &SegmenterConfig::default());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::SlideHeader);
        assert_eq!(chunks[1].metadata.slide_number, Some(1));
        assert_eq!(chunks[2].metadata.slide_number, Some(2));
        assert!(chunks[2].content.contains("Supervised"));
    }

    #[test]
    fn slide_content_without_markers_falls_back_to_paragraphs() {
        let mut slide_meta = meta();
        slide_meta.content_type = Some("slides".to_string());
        let text = "Just a paragraph.\n\nAnother paragraph.";

        let chunks = segment(text, &slide_meta, &SegmenterConfig::default());
        assert!(chunks
            .iter()
            .all(|c| c.metadata.chunk_type == ChunkType::ParagraphGroup));
    }

    #[test]
    fn code_is_split_at_definitions_with_names() {
        let mut code_meta = ChunkMetadata::new("lesson.py", "deadbeef");
        code_meta.content_type = Some("code".to_string());
        let text = "import math\n\ndef area(r):\n    return math.pi * r * r\n\ndef perimeter(r):\n    return 2 * math.pi * r\n";

        let chunks = segment(text, &code_meta, &SegmenterConfig::default());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::CodeHeader);
        assert_eq!(chunks[1].metadata.chunk_type, ChunkType::CodeFunction);
        assert_eq!(chunks[1].metadata.function_name.as_deref(), Some("area"));
        assert_eq!(chunks[2].metadata.function_name.as_deref(), Some("perimeter"));
    }

    #[test]
    fn code_without_definitions_falls_back_to_paragraphs() {
        let mut code_meta = ChunkMetadata::new("query.sql", "deadbeef");
        let text = "SELECT *\nFROM students;\n\nSELECT name FROM courses;";

        code_meta.content_type = Some("code".to_string());
        let chunks = segment(text, &code_meta, &SegmenterConfig::default());
        assert!(!chunks.is_empty());
        assert!(chunks
            .iter()
            .all(|c| c.metadata.chunk_type == ChunkType::ParagraphGroup));
    }

    #[test]
    fn nonblank_input_never_yields_zero_chunks() {
        let chunks = segment("solo", &meta(), &SegmenterConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "solo");
    }

    #[test]
    fn blank_input_yields_no_chunks() {
        let chunks = segment("  \n \n ", &meta(), &SegmenterConfig::default());
        assert!(chunks.is_empty());
    }
}
