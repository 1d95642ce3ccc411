use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    chunking::{Chunk, chunk_document},
    data_dir::DataDir,
    document::Document,
    embedding::{
        DEFAULT_EMBED_BATCH_SIZE,
        EmbeddingProvider,
        Provenance,
        embed_chunks,
    },
    error::{Error, Result},
    index::{IndexHandle, IndexSnapshot},
    lexical::LexicalIndex,
    vector_store::{IndexedVector, VectorIndex},
    walker,
};

/// Counts from one index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Documents handed to the chunker.
    pub documents: usize,
    /// Documents dropped because they could not be parsed or chunked.
    pub skipped: usize,
    pub chunks: usize,
    /// Embedded chunks; zero when no provider was supplied.
    pub vectors: usize,
}

/// Read and parse every markdown file under `root` as part of `package`.
///
/// Files that cannot be read or whose front-matter is malformed are logged
/// and skipped; the second value is how many were skipped.
pub fn load_corpus(
    root: &Path,
    package: &str,
) -> Result<(Vec<Document>, usize)> {
    let files = walker::discover_markdown(root)?;

    let parsed: Vec<Result<Document>> = files
        .par_iter()
        .map(|file| {
            let raw = std::fs::read_to_string(&file.absolute_path)?;
            Document::parse(&file.relative_path, package, &raw)
        })
        .collect();

    let mut documents = Vec::with_capacity(parsed.len());
    let mut skipped = 0;
    for (file, result) in files.iter().zip(parsed) {
        match result {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                tracing::warn!(path = %file.relative_path, error = %e, "skipping document");
                skipped += 1;
            }
        }
    }

    tracing::debug!(
        root = %root.display(),
        documents = documents.len(),
        skipped,
        "loaded corpus"
    );

    Ok((documents, skipped))
}

/// Chunk every document, skipping (and logging) the ones that fail.
///
/// Chunk order follows document order.
pub fn chunk_documents(documents: &[Document]) -> (Vec<Chunk>, usize) {
    let results: Vec<Result<Vec<Chunk>>> =
        documents.par_iter().map(chunk_document).collect();

    let mut chunks = Vec::new();
    let mut skipped = 0;
    for (doc, result) in documents.iter().zip(results) {
        match result {
            Ok(mut doc_chunks) => chunks.append(&mut doc_chunks),
            Err(e) => {
                tracing::warn!(path = %doc.path, error = %e, "skipping document");
                skipped += 1;
            }
        }
    }

    (chunks, skipped)
}

/// Build and persist a fresh lexical index, and a vector index when a
/// provider is given, from `documents`.
///
/// Both artifacts are written to staging paths first and moved into place
/// only once both are complete, so a failed build leaves the previous pair
/// untouched. Without a provider any existing vector store is removed.
/// Fails with [`Error::EmptyCorpus`] if no document yields a chunk.
pub async fn build_index(
    documents: Vec<Document>,
    provider: Option<&dyn EmbeddingProvider>,
    data_dir: &DataDir,
) -> Result<(IndexSnapshot, BuildReport)> {
    let document_count = documents.len();
    let (chunks, skipped) =
        tokio::task::spawn_blocking(move || chunk_documents(&documents))
            .await?;

    if chunks.is_empty() {
        return Err(Error::EmptyCorpus);
    }

    let embedded = match provider {
        Some(provider) => Some((
            provider.provenance(),
            embed_chunks(provider, &chunks, DEFAULT_EMBED_BATCH_SIZE).await?,
        )),
        None => None,
    };

    let paths = StagingPaths::new(data_dir);
    let staged = paths.clone();
    let built = tokio::task::spawn_blocking(move || {
        let result = stage(&staged, chunks, embedded);
        if result.is_err() {
            staged.discard();
        }
        result
    })
    .await??;
    let (lexical, vector) = built;

    let vector = paths.commit(vector)?;

    let report = BuildReport {
        documents: document_count,
        skipped,
        chunks: lexical.len(),
        vectors: vector.as_ref().map_or(0, VectorIndex::len),
    };

    tracing::info!(
        documents = report.documents,
        skipped = report.skipped,
        chunks = report.chunks,
        vectors = report.vectors,
        "index build complete"
    );

    Ok((IndexSnapshot::new(lexical, vector), report))
}

#[derive(Debug, Clone)]
struct StagingPaths {
    lexical: PathBuf,
    lexical_staging: PathBuf,
    vector: PathBuf,
    vector_staging: PathBuf,
}

impl StagingPaths {
    fn new(data_dir: &DataDir) -> Self {
        let lexical = data_dir.lexical_artifact();
        let vector = data_dir.vector_dir();
        Self {
            lexical_staging: lexical.with_extension("json.staging"),
            vector_staging: vector.with_extension("staging"),
            lexical,
            vector,
        }
    }

    fn discard(&self) {
        let _ = std::fs::remove_file(&self.lexical_staging);
        let _ = std::fs::remove_dir_all(&self.vector_staging);
    }

    /// Move staged artifacts over the live ones.
    fn commit(
        &self,
        vector: Option<VectorIndex>,
    ) -> Result<Option<VectorIndex>> {
        if self.vector.exists() {
            if vector.is_none() {
                tracing::info!(
                    dir = %self.vector.display(),
                    "removing stale vector store"
                );
            }
            std::fs::remove_dir_all(&self.vector)?;
        }
        let vector = match vector {
            Some(index) => {
                std::fs::rename(&self.vector_staging, &self.vector)?;
                Some(index.relocated(self.vector.clone()))
            }
            None => None,
        };
        std::fs::rename(&self.lexical_staging, &self.lexical)?;
        Ok(vector)
    }
}

/// Build both indexes and write them to the staging paths.
fn stage(
    paths: &StagingPaths,
    chunks: Vec<Chunk>,
    embedded: Option<(Provenance, Vec<IndexedVector>)>,
) -> Result<(LexicalIndex, Option<VectorIndex>)> {
    paths.discard();

    let vector = match embedded {
        Some((provenance, records)) => Some(VectorIndex::build(
            &paths.vector_staging,
            records,
            provenance,
        )?),
        None => None,
    };

    let lexical = LexicalIndex::build(chunks)?;
    lexical.save(&paths.lexical_staging)?;

    Ok((lexical, vector))
}

/// Run [`build_index`] and swap the result into `handle`.
///
/// Queries keep using the previous snapshot, if any, until the new one is
/// installed. On failure the handle returns to its previous state.
pub async fn rebuild(
    handle: &IndexHandle,
    documents: Vec<Document>,
    provider: Option<&dyn EmbeddingProvider>,
    data_dir: &DataDir,
) -> Result<BuildReport> {
    let previous = handle.begin_build();
    match build_index(documents, provider, data_dir).await {
        Ok((snapshot, report)) => {
            handle.install(snapshot);
            Ok(report)
        }
        Err(e) => {
            handle.abort_build(previous);
            Err(e)
        }
    }
}
