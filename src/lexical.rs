use std::path::Path;

use serde::{Deserialize, Serialize};
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    fusion::RankedResult,
};

/// Version tag written into the persisted artifact.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Single-threaded writer budget. One thread keeps document order, and
/// therefore tie order, identical between a build and a restore.
const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const PATH: &str = "path";
    pub const PACKAGE: &str = "package";
    pub const TAGS: &str = "tags";
    pub const TITLE: &str = "title";
    pub const SUMMARY: &str = "summary";
    pub const HEADINGS: &str = "headings";
    pub const CONTENT: &str = "content";
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    path: Field,
    package: Field,
    tags: Field,
    title: Field,
    summary: Field,
    headings: Field,
    content: Field,
}

/// Restricts a lexical query to chunks matching any listed package and
/// any listed tag. Empty lists do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub packages: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format_version: u32,
    chunks: &'a [Chunk],
}

#[derive(Deserialize)]
struct Artifact {
    format_version: u32,
    chunks: Vec<Chunk>,
}

/// In-memory BM25 index over chunk text fields.
///
/// The index is immutable once built. Its persisted form is the chunk list
/// itself; [`LexicalIndex::restore`] replays the same deterministic build,
/// so a restored index ranks exactly like the original.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    chunks: Vec<Chunk>,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let id = builder.add_text_field(fields::ID, STRING | STORED);
    let path = builder.add_text_field(fields::PATH, STRING | STORED);
    let package =
        builder.add_text_field(fields::PACKAGE, STRING | STORED | FAST);
    let tags = builder.add_text_field(fields::TAGS, STRING | STORED);

    let stemmed = TextFieldIndexing::default()
        .set_tokenizer("en_stem")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);

    let title = builder.add_text_field(
        fields::TITLE,
        TextOptions::default()
            .set_indexing_options(stemmed.clone())
            .set_stored(),
    );
    let summary = builder.add_text_field(
        fields::SUMMARY,
        TextOptions::default().set_indexing_options(stemmed.clone()),
    );
    let headings = builder.add_text_field(
        fields::HEADINGS,
        TextOptions::default().set_indexing_options(stemmed.clone()),
    );
    let content = builder.add_text_field(
        fields::CONTENT,
        TextOptions::default()
            .set_indexing_options(stemmed)
            .set_stored(),
    );

    let schema = builder.build();
    let fields = SchemaFields {
        id,
        path,
        package,
        tags,
        title,
        summary,
        headings,
        content,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl LexicalIndex {
    /// Bulk-load chunks into a fresh index.
    pub fn build(chunks: Vec<Chunk>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);

        let mut writer: IndexWriter =
            index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET)?;
        for chunk in &chunks {
            writer.add_document(to_document(&fields, chunk))?;
        }
        writer.commit()?;

        let reader = index.reader()?;
        reader.reload()?;

        tracing::debug!(chunks = chunks.len(), "built lexical index");

        Ok(Self {
            index,
            reader,
            fields,
            chunks,
        })
    }

    /// Serialize the index into a single artifact.
    pub fn persist(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&ArtifactRef {
            format_version: ARTIFACT_FORMAT_VERSION,
            chunks: &self.chunks,
        })?)
    }

    /// Rebuild an index from an artifact produced by [`Self::persist`].
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let artifact: Artifact = serde_json::from_slice(bytes)?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(Error::Config(format!(
                "unsupported lexical artifact version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        Self::build(artifact.chunks)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.persist()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound {
                kind: "lexical index",
                name: path.display().to_string(),
            });
        }
        Self::restore(&std::fs::read(path)?)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// BM25 search over title, content, summary and headings.
    ///
    /// Returns at most `limit` hits in native rank order. The title field
    /// is boosted 2x and headings 1.5x.
    pub fn search(
        &self,
        query_str: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields;
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.title, f.content, f.summary, f.headings],
        );
        parser.set_field_boost(f.title, 2.0);
        parser.set_field_boost(f.headings, 1.5);
        let (user_query, _errors) = parser.parse_query_lenient(query_str);

        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Must, user_query)];
        if let Some(filter) = any_of(f.package, &filters.packages) {
            clauses.push((Occur::Must, filter));
        }
        if let Some(filter) = any_of(f.tags, &filters.tags) {
            clauses.push((Occur::Must, filter));
        }
        let query = BooleanQuery::new(clauses);

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(RankedResult {
                id: extract_text(&doc, f.id),
                content: extract_text(&doc, f.content),
                path: extract_text(&doc, f.path),
                package: extract_text(&doc, f.package),
                title: extract_text(&doc, f.title),
                score,
            });
        }

        Ok(results)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

fn to_document(f: &SchemaFields, chunk: &Chunk) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    doc.add_text(f.id, &chunk.id);
    doc.add_text(f.path, &chunk.path);
    doc.add_text(f.package, &chunk.package);
    for tag in &chunk.metadata.tags {
        doc.add_text(f.tags, tag);
    }
    doc.add_text(f.title, &chunk.metadata.title);
    if let Some(summary) = &chunk.metadata.summary {
        doc.add_text(f.summary, summary);
    }
    doc.add_text(f.headings, chunk.headings.join(" / "));
    doc.add_text(f.content, &chunk.content);
    doc
}

/// Disjunction of exact-term matches, or `None` for an empty list.
fn any_of(field: Field, values: &[String]) -> Option<Box<dyn Query>> {
    if values.is_empty() {
        return None;
    }
    let clauses = values
        .iter()
        .map(|value| {
            let term = Term::from_field_text(field, value);
            let query: Box<dyn Query> =
                Box::new(TermQuery::new(term, IndexRecordOption::Basic));
            (Occur::Should, query)
        })
        .collect();
    Some(Box::new(BooleanQuery::new(clauses)))
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;

    fn chunk(
        id: &str,
        package: &str,
        title: &str,
        content: &str,
        tags: &[&str],
    ) -> Chunk {
        let path = id.split('#').next().unwrap().to_string();
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            path,
            package: package.to_string(),
            headings: vec![title.to_string()],
            metadata: ChunkMetadata {
                title: title.to_string(),
                summary: None,
                doc_type: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    fn sample_index() -> LexicalIndex {
        LexicalIndex::build(vec![
            chunk(
                "rust.md#0",
                "lang",
                "Rust Guide",
                "Rust is a systems programming language focused on safety",
                &["systems"],
            ),
            chunk(
                "python.md#0",
                "lang",
                "Python Intro",
                "Python is an interpreted programming language",
                &["scripting"],
            ),
            chunk(
                "pasta.md#0",
                "food",
                "Cooking Pasta",
                "Boil water, add salt, cook the pasta and drain it",
                &["kitchen"],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn search_ranks_relevant_chunk_first() {
        let idx = sample_index();
        let results =
            idx.search("rust safety", &SearchFilters::default(), 10).unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].id, "rust.md#0");
        assert_eq!(results[0].package, "lang");
        assert_eq!(results[0].title, "Rust Guide");
        assert!(results[0].content.contains("systems programming"));
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn search_respects_limit() {
        let idx = sample_index();
        let results =
            idx.search("programming", &SearchFilters::default(), 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!(
            idx.search("programming", &SearchFilters::default(), 0)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn package_filter_restricts_results() {
        let idx = sample_index();
        let filters = SearchFilters {
            packages: vec!["food".to_string()],
            tags: vec![],
        };
        let results = idx.search("language pasta", &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "pasta.md#0");
    }

    #[test]
    fn tag_filter_restricts_results() {
        let idx = sample_index();
        let filters = SearchFilters {
            packages: vec![],
            tags: vec!["scripting".to_string(), "missing".to_string()],
        };
        let results = idx.search("programming", &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "python.md#0");
    }

    #[test]
    fn title_boost() {
        let idx = LexicalIndex::build(vec![
            chunk("a.md#0", "p", "Rust Guide", "programming language guide", &[]),
            chunk("b.md#0", "p", "Language Guide", "rust is a programming language", &[]),
        ])
        .unwrap();

        let results = idx.search("rust", &SearchFilters::default(), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a.md#0");
    }

    #[test]
    fn stemming_works() {
        let idx = LexicalIndex::build(vec![chunk(
            "run.md#0",
            "p",
            "Running",
            "the runners were running quickly",
            &[],
        )])
        .unwrap();
        let results = idx.search("run", &SearchFilters::default(), 10).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn build_rejects_empty_corpus() {
        assert!(matches!(
            LexicalIndex::build(Vec::new()),
            Err(Error::EmptyCorpus)
        ));
    }

    #[test]
    fn persist_restore_reproduces_results() {
        let original = sample_index();
        let restored = LexicalIndex::restore(&original.persist().unwrap()).unwrap();

        assert_eq!(restored.len(), original.len());
        for query in ["programming language", "pasta", "rust", "nothing-here"] {
            let a = original.search(query, &SearchFilters::default(), 10).unwrap();
            let b = restored.search(query, &SearchFilters::default(), 10).unwrap();
            assert_eq!(a, b, "query {query:?} differs after restore");
        }
    }

    #[test]
    fn restore_rejects_unknown_version() {
        let bytes = br#"{"format_version":99,"chunks":[]}"#;
        assert!(matches!(
            LexicalIndex::restore(bytes),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn restore_rejects_garbage() {
        assert!(matches!(
            LexicalIndex::restore(b"not json"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("lexical.json");

        sample_index().save(&path).unwrap();
        let idx = LexicalIndex::load(&path).unwrap();
        let results = idx.search("pasta", &SearchFilters::default(), 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "pasta.md#0");
    }

    #[test]
    fn load_missing_artifact_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = LexicalIndex::load(&tmp.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
