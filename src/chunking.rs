//! Heading-aware markdown chunking.
//!
//! A document is first cut into sections at level-2 headings, then any
//! section longer than [`TARGET_CHUNK_SIZE`] characters is re-split on
//! paragraph boundaries. Fragments shorter than [`MIN_CHUNK_SIZE`] are
//! dropped rather than merged into a neighbour.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    document::Document,
    error::{Error, Result},
};

/// Fragments below this many characters are not indexed.
pub const MIN_CHUNK_SIZE: usize = 100;

/// Sections above this many characters are re-split on paragraphs.
pub const TARGET_CHUNK_SIZE: usize = 500;

/// Document-level metadata copied onto every chunk of that document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub summary: Option<String>,
    pub doc_type: Option<String>,
    pub tags: Vec<String>,
}

/// An immutable, independently retrievable fragment of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"<path>#<n>"`, `n` being the zero-based emission order.
    pub id: String,
    pub content: String,
    pub path: String,
    pub package: String,
    /// Heading path from the document title down to the nearest
    /// enclosing subheading (1 to 3 entries).
    pub headings: Vec<String>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug)]
struct Section {
    headings: Vec<String>,
    content: String,
}

/// Split one document into chunks.
///
/// # Examples
///
/// ```
/// use docrank::{chunking::chunk_document, document::Document};
///
/// let doc = Document {
///     path: "intro.md".into(),
///     package: "core".into(),
///     body: "An introduction that is comfortably longer than the minimum \
///            chunk size, so the whole body becomes a single chunk."
///         .into(),
///     ..Default::default()
/// };
/// let chunks = chunk_document(&doc).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].id, "intro.md#0");
/// assert_eq!(chunks[0].headings, vec!["Intro"]);
/// ```
pub fn chunk_document(doc: &Document) -> Result<Vec<Chunk>> {
    if doc.path.trim().is_empty() {
        return Err(Error::Parse {
            path: doc.path.clone(),
            reason: "document path is empty".to_string(),
        });
    }

    let title = resolve_title(doc);
    let metadata = ChunkMetadata {
        title: title.clone(),
        summary: doc.summary.clone(),
        doc_type: doc.doc_type.clone(),
        tags: doc.tags.clone(),
    };

    let chunks = split_sections(&doc.body, &title)
        .into_iter()
        .flat_map(|section| {
            split_paragraphs(&section.content)
                .into_iter()
                .map(move |content| (section.headings.clone(), content))
        })
        .enumerate()
        .map(|(index, (headings, content))| Chunk {
            id: format!("{}#{index}", doc.path),
            content,
            path: doc.path.clone(),
            package: doc.package.clone(),
            headings,
            metadata: metadata.clone(),
        })
        .collect();

    Ok(chunks)
}

/// Explicit title, else the first `# ` heading, else the file name.
fn resolve_title(doc: &Document) -> String {
    if let Some(title) = &doc.title
        && !title.trim().is_empty()
    {
        return title.trim().to_string();
    }

    for line in doc.body.lines() {
        if let Some((1, text)) = parse_heading(line) {
            return text.to_string();
        }
    }

    title_from_path(&doc.path)
}

/// `"guides/getting-started.md"` becomes `"Getting Started"`.
fn title_from_path(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let title = stem
        .split(['-', '_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ");

    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

/// Recognise an ATX heading, returning its level and trimmed text.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_end();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }

    let rest = &trimmed[level..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }

    let text = rest.trim();
    (!text.is_empty()).then_some((level, text))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn flush(sections: &mut Vec<Section>, section: Section) {
    let content = section.content.trim();
    if char_len(content) >= MIN_CHUNK_SIZE {
        sections.push(Section {
            headings: section.headings,
            content: content.to_string(),
        });
    }
}

fn split_sections(body: &str, title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        headings: vec![title.to_string()],
        content: String::new(),
    };
    let mut title_consumed = false;
    let mut current_h2: Option<String> = None;

    for line in body.lines() {
        match parse_heading(line) {
            Some((1, _)) if !title_consumed => {
                title_consumed = true;
            }
            Some((2, text)) => {
                let next = Section {
                    headings: vec![title.to_string(), text.to_string()],
                    content: String::new(),
                };
                flush(&mut sections, std::mem::replace(&mut current, next));
                current_h2 = Some(text.to_string());
            }
            Some((level, text)) if level >= 3 => {
                current.headings = match &current_h2 {
                    Some(h2) => {
                        vec![title.to_string(), h2.clone(), text.to_string()]
                    }
                    None => vec![title.to_string(), text.to_string()],
                };
            }
            _ => {
                current.content.push_str(line);
                current.content.push('\n');
            }
        }
    }

    if current_h2.is_none() {
        // No level-2 structure: the whole body is one section.
        let whole = body.trim();
        return if char_len(whole) >= MIN_CHUNK_SIZE {
            vec![Section {
                headings: vec![title.to_string()],
                content: whole.to_string(),
            }]
        } else {
            Vec::new()
        };
    }

    flush(&mut sections, current);
    sections
}

/// Blank-line separated blocks, each with its inner line breaks intact.
fn paragraphs(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !block.is_empty() {
                blocks.push(block.join("\n"));
                block.clear();
            }
        } else {
            block.push(line);
        }
    }
    if !block.is_empty() {
        blocks.push(block.join("\n"));
    }

    blocks
}

fn split_paragraphs(content: &str) -> Vec<String> {
    if char_len(content) <= TARGET_CHUNK_SIZE {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut acc = String::new();

    for paragraph in paragraphs(content) {
        let joined_len = if acc.is_empty() {
            char_len(&paragraph)
        } else {
            char_len(&acc) + 2 + char_len(&paragraph)
        };

        if !acc.is_empty() && joined_len > TARGET_CHUNK_SIZE {
            let full = std::mem::replace(&mut acc, paragraph);
            if char_len(&full) >= MIN_CHUNK_SIZE {
                chunks.push(full);
            }
        } else {
            if !acc.is_empty() {
                acc.push_str("\n\n");
            }
            acc.push_str(&paragraph);
        }
    }

    if char_len(&acc) >= MIN_CHUNK_SIZE {
        chunks.push(acc);
    }

    if chunks.is_empty() {
        vec![content.to_string()]
    } else {
        chunks
    }
}
