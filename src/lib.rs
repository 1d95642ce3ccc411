//! docrank - hybrid keyword and semantic search over markdown documentation.
//!
//! Documents are split into heading-scoped chunks, indexed for BM25 keyword
//! search via [Tantivy](https://github.com/quickwit-oss/tantivy) and, when an
//! [`EmbeddingProvider`] is supplied, for nearest-neighbour search over
//! embedding vectors. Queries run against either source or both, with the
//! two ranked lists combined by weighted reciprocal rank fusion.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docrank::{DataDir, IndexHandle, SearchEngine, SearchRequest, ingestion};
//!
//! # async fn run() -> docrank::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let (documents, _skipped) =
//!     ingestion::load_corpus(std::path::Path::new("docs"), "core")?;
//!
//! let handle = Arc::new(IndexHandle::new());
//! ingestion::rebuild(&handle, documents, None, &data_dir).await?;
//!
//! let engine = SearchEngine::new(handle);
//! let response = engine.hybrid_search(SearchRequest::new("install")).await?;
//! print!("{}", docrank::search::format_human(&response));
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod document;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod ingestion;
pub mod lexical;
pub mod search;
pub mod vector_store;
pub mod walker;

pub use chunking::{Chunk, ChunkMetadata, chunk_document};
pub use config::{FusionConfig, SearchDefaults};
pub use data_dir::DataDir;
pub use document::Document;
pub use embedding::{EmbeddingProvider, Embeddings, Provenance};
pub use error::{Error, Result};
pub use fusion::{FusionResult, RankedResult, SourceRanks};
pub use index::{IndexHandle, IndexSnapshot, IndexState};
pub use lexical::{LexicalIndex, SearchFilters};
pub use search::{
    SearchEngine, SearchHits, SearchMode, SearchRequest, SearchResponse,
};
pub use vector_store::{IndexedVector, VectorIndex};
