//! Parsed documents as handed to the chunker.
//!
//! The chunker never touches the filesystem; it consumes [`Document`]
//! records whose front-matter has already been split from the markdown
//! body. [`Document::parse`] does that split for the CLI's directory
//! source.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One source document: front-matter fields plus the markdown body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Path relative to the corpus root.
    pub path: String,
    /// Source collection the document belongs to.
    pub package: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub doc_type: Option<String>,
    pub tags: Vec<String>,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    tags: Option<Tags>,
}

/// `tags` may be a YAML list of scalars or a single comma-separated value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Tags {
    List(Vec<serde_yaml::Value>),
    Single(serde_yaml::Value),
}

impl Tags {
    fn into_vec(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            Tags::List(items) => items.iter().filter_map(scalar_text).collect(),
            Tags::Single(value) => scalar_text(&value)
                .map(|csv| csv.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };
        raw.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Text of a string, number or boolean. Nulls and nested values yield
/// `None`.
fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Document {
    /// Split YAML front-matter (fenced by `---` lines) from `raw` and build
    /// a document. Text without a leading fence is treated as pure body.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrank::document::Document;
    ///
    /// let raw = "---\ntitle: Install\ntags: [setup, cli]\n---\nRun the installer.";
    /// let doc = Document::parse("guide/install.md", "core", raw).unwrap();
    /// assert_eq!(doc.title.as_deref(), Some("Install"));
    /// assert_eq!(doc.tags, vec!["setup", "cli"]);
    /// assert_eq!(doc.body, "Run the installer.");
    /// ```
    pub fn parse(path: &str, package: &str, raw: &str) -> Result<Self> {
        let (front, body) = split_front_matter(raw).ok_or_else(|| {
            Error::Parse {
                path: path.to_string(),
                reason: "unterminated front-matter block".to_string(),
            }
        })?;

        let meta = match front {
            Some(yaml) if !yaml.trim().is_empty() => {
                serde_yaml::from_str::<FrontMatter>(yaml).map_err(|e| {
                    Error::Parse {
                        path: path.to_string(),
                        reason: e.to_string(),
                    }
                })?
            }
            _ => FrontMatter::default(),
        };

        Ok(Self {
            path: path.to_string(),
            package: package.to_string(),
            title: non_empty(meta.title),
            summary: non_empty(meta.summary.or(meta.description)),
            doc_type: non_empty(meta.doc_type),
            tags: meta.tags.map(Tags::into_vec).unwrap_or_default(),
            body: body.to_string(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Returns `(front_matter, body)`. `None` when an opening fence has no
/// closing fence.
fn split_front_matter(raw: &str) -> Option<(Option<&str>, &str)> {
    let rest = match raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return Some((None, raw)),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((Some(front), body));
        }
        offset += line.len();
    }

    None
}
