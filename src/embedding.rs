use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    vector_store::IndexedVector,
};

/// Default number of texts sent to a provider per call while indexing.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

/// Identity of the model that produced a set of vectors.
///
/// Every vector in one index shares the same provenance; distances between
/// vectors from different provenances are meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({}d)", self.provider, self.model, self.dimensions)
    }
}

/// Result of a batch embedding call.
#[derive(Debug, Clone)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

/// A backend that turns text into fixed-length vectors.
///
/// Implementations live outside this crate; the search engine only holds an
/// `Arc<dyn EmbeddingProvider>`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider, model and dimension this backend produces.
    fn provenance(&self) -> Provenance;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn generate(&self, texts: &[String]) -> Result<Embeddings>;

    /// Embed a single query string.
    async fn generate_one(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.generate(&[text.to_string()]).await?;
        let vector = embeddings.vectors.into_iter().next().ok_or_else(|| {
            Error::Provider("provider returned no vector".to_string())
        })?;
        check_embedding(self.provenance().dimensions, &vector)?;
        Ok(vector)
    }
}

/// Length must match `expected` and every component must be finite.
pub(crate) fn check_embedding(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(Error::Provider("non-finite embedding".to_string()));
    }
    Ok(())
}

/// Embed every chunk's content in batches and pair each chunk with its
/// vector.
///
/// Fails on the first provider error, on a batch returning the wrong number
/// of vectors, or on any vector that is not finite or whose length differs
/// from the provider's declared dimension.
pub async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<IndexedVector>> {
    let provenance = provider.provenance();
    let mut records = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> =
            batch.iter().map(|c| c.content.clone()).collect();
        let embeddings = provider.generate(&texts).await?;

        if embeddings.vectors.len() != batch.len() {
            return Err(Error::Provider(format!(
                "expected {} vectors, got {}",
                batch.len(),
                embeddings.vectors.len()
            )));
        }

        for (chunk, embedding) in batch.iter().zip(embeddings.vectors) {
            check_embedding(provenance.dimensions, &embedding)?;
            records.push(IndexedVector::from_chunk(chunk, embedding));
        }

        tracing::debug!(
            embedded = records.len(),
            total = chunks.len(),
            "embedded batch"
        );
    }

    Ok(records)
}
