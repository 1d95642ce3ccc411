use std::path::{Path, PathBuf};

use crate::error::Result;

/// A markdown file found under a corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the corpus root, with `/` separators.
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "mdx"];

/// Recursively collect markdown files under `root`.
///
/// Hidden entries (leading `.`) are skipped, symlinked directories are not
/// followed, and results are sorted by relative path.
pub fn discover_markdown(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk(root, &path, results)?;
        } else if file_type.is_symlink() {
            // Broken links are ignored.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file() && is_markdown(&resolved) {
                results.push(discovered(root, &path, resolved));
            }
        } else if file_type.is_file() && is_markdown(&path) {
            let absolute = path.canonicalize()?;
            results.push(discovered(root, &path, absolute));
        }
    }

    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

fn discovered(
    root: &Path,
    original: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    let relative = original.strip_prefix(root).unwrap_or(original);
    let relative_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    DiscoveredFile {
        relative_path,
        absolute_path,
    }
}
