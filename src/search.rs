use std::{fmt, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::{FusionConfig, SearchDefaults},
    embedding::{EmbeddingProvider, Provenance},
    error::{Error, Result},
    fusion::{self, FusionResult, RankedResult},
    index::{IndexHandle, IndexSnapshot},
    lexical::SearchFilters,
};

/// Which sources a query consults.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Lexical index only, native BM25 order.
    Fulltext,
    /// Vector index only.
    Semantic,
    /// Both, combined with reciprocal rank fusion.
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fulltext => "fulltext",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// `None` picks hybrid when vector search is possible, else fulltext.
    pub mode: Option<SearchMode>,
    /// Restrict hits to these packages. Empty means all.
    pub packages: Vec<String>,
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Fulltext queries return single-source hits; the other modes return
/// fused hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchHits {
    Ranked(Vec<RankedResult>),
    Fused(Vec<FusionResult>),
}

impl SearchHits {
    pub fn len(&self) -> usize {
        match self {
            Self::Ranked(hits) => hits.len(),
            Self::Fused(hits) => hits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit ids in rank order.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Ranked(hits) => hits.iter().map(|h| h.id.as_str()).collect(),
            Self::Fused(hits) => hits.iter().map(|h| h.id.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Mode actually used, after any degradation.
    pub mode: SearchMode,
    pub hits: SearchHits,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Query entry point over an [`IndexHandle`].
///
/// The embedding provider is optional; without one only fulltext search is
/// possible and hybrid requests degrade to it.
pub struct SearchEngine {
    index: Arc<IndexHandle>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    fusion: FusionConfig,
    defaults: SearchDefaults,
}

impl SearchEngine {
    pub fn new(index: Arc<IndexHandle>) -> Self {
        Self {
            index,
            provider: None,
            fusion: FusionConfig::default(),
            defaults: SearchDefaults::default(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_defaults(mut self, defaults: SearchDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// Run one query.
    ///
    /// Fails with `NotReady` if the index handle holds no snapshot,
    /// `Unavailable` for semantic mode without a vector index or provider,
    /// `ProviderMismatch` when the provider differs from the one the vector
    /// index was built with, and `Provider` when embedding the query fails.
    /// Hybrid mode without vector search degrades to fulltext and records a
    /// warning instead of failing.
    pub async fn hybrid_search(
        &self,
        request: SearchRequest,
    ) -> Result<SearchResponse> {
        let snapshot = self.index.snapshot()?;
        let started = Instant::now();
        let limit = request.limit.unwrap_or(self.defaults.limit);

        let unavailable = self.vector_unavailable(&snapshot);
        let requested = request.mode.unwrap_or(if unavailable.is_none() {
            SearchMode::Hybrid
        } else {
            SearchMode::Fulltext
        });

        let mut warnings = Vec::new();
        let mode = match (requested, unavailable) {
            (SearchMode::Semantic, Some(reason)) => {
                return Err(Error::Unavailable(reason.to_string()));
            }
            (SearchMode::Hybrid, Some(reason)) => {
                tracing::warn!(reason, "hybrid search degraded to fulltext");
                warnings.push(format!(
                    "vector search unavailable ({reason}); using fulltext"
                ));
                SearchMode::Fulltext
            }
            (mode, _) => mode,
        };

        let hits = match mode {
            SearchMode::Fulltext => SearchHits::Ranked(
                lexical_search(
                    Arc::clone(&snapshot),
                    request.query.clone(),
                    request.packages.clone(),
                    limit,
                )
                .await?,
            ),
            SearchMode::Semantic => {
                let fetch = self.defaults.overfetch(limit);
                let vector = self
                    .vector_search(&snapshot, &request.query, &request.packages, fetch)
                    .await?;
                SearchHits::Fused(fusion::fuse(
                    &[],
                    &vector,
                    &request.query,
                    &self.fusion,
                    limit,
                ))
            }
            SearchMode::Hybrid => {
                let fetch = self.defaults.overfetch(limit);
                // Neither branch runs until join! polls both; only the vector
                // branch waits on the query embedding.
                let lexical = lexical_search(
                    Arc::clone(&snapshot),
                    request.query.clone(),
                    request.packages.clone(),
                    fetch,
                );
                let vector = self.vector_search(
                    &snapshot,
                    &request.query,
                    &request.packages,
                    fetch,
                );
                let (lexical, vector) = tokio::join!(lexical, vector);
                let (lexical, vector) = (lexical?, vector?);

                tracing::debug!(
                    fulltext = lexical.len(),
                    vector = vector.len(),
                    "fusing candidates"
                );
                SearchHits::Fused(fusion::fuse(
                    &lexical,
                    &vector,
                    &request.query,
                    &self.fusion,
                    limit,
                ))
            }
        };

        tracing::debug!(
            query = %request.query,
            %mode,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );

        Ok(SearchResponse {
            query: request.query,
            mode,
            hits,
            warnings,
        })
    }

    fn vector_unavailable(&self, snapshot: &IndexSnapshot) -> Option<&'static str> {
        if snapshot.vector().is_none() {
            Some("no vector index")
        } else if self.provider.is_none() {
            Some("no embedding provider configured")
        } else {
            None
        }
    }

    async fn vector_search(
        &self,
        snapshot: &Arc<IndexSnapshot>,
        query: &str,
        packages: &[String],
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            Error::Unavailable("no embedding provider configured".to_string())
        })?;
        let index = snapshot
            .vector()
            .ok_or_else(|| Error::Unavailable("no vector index".to_string()))?;

        check_provenance(index.metadata(), &provider.provenance())?;

        let embedding =
            provider.generate_one(query).await.map_err(|e| match e {
                Error::Provider(_) | Error::DimensionMismatch { .. } => e,
                other => Error::Provider(other.to_string()),
            })?;

        let snapshot = Arc::clone(snapshot);
        let packages = packages.to_vec();
        tokio::task::spawn_blocking(move || match snapshot.vector() {
            Some(index) => {
                index.search_in_packages(&embedding, &packages, limit)
            }
            None => Ok(Vec::new()),
        })
        .await?
    }
}

async fn lexical_search(
    snapshot: Arc<IndexSnapshot>,
    query: String,
    packages: Vec<String>,
    limit: usize,
) -> Result<Vec<RankedResult>> {
    let filters = SearchFilters {
        packages,
        ..Default::default()
    };
    tokio::task::spawn_blocking(move || {
        snapshot.lexical().search(&query, &filters, limit)
    })
    .await?
}

/// A query embedding is only comparable to index vectors from the same
/// provider, model and dimension.
fn check_provenance(index: Option<&Provenance>, query: &Provenance) -> Result<()> {
    match index {
        Some(index) if index != query => Err(Error::ProviderMismatch {
            index: index.to_string(),
            query: query.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            tracing::warn!(
                query = %query,
                "vector index has no provenance; cannot verify provider"
            );
            Ok(())
        }
    }
}

/// Render a response for terminal output.
pub fn format_human(response: &SearchResponse) -> String {
    let mut out = String::new();
    for warning in &response.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }

    if response.hits.is_empty() {
        out.push_str("No results found.\n");
        return out;
    }

    match &response.hits {
        SearchHits::Ranked(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                push_hit(&mut out, i + 1, hit.score, &hit.package, &hit.path, &hit.title);
            }
        }
        SearchHits::Fused(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                push_hit(&mut out, i + 1, hit.score, &hit.package, &hit.path, &hit.title);
                let mut sources = Vec::new();
                if let Some(rank) = hit.sources.fulltext_rank {
                    sources.push(format!("fulltext #{rank}"));
                }
                if let Some(rank) = hit.sources.vector_rank {
                    sources.push(format!("vector #{rank}"));
                }
                if !sources.is_empty() {
                    out.push_str(&format!("     ({})\n", sources.join(", ")));
                }
            }
        }
    }

    out.push_str(&format!(
        "\n{} result(s) ({})\n",
        response.hits.len(),
        response.mode
    ));
    out
}

fn push_hit(
    out: &mut String,
    rank: usize,
    score: f32,
    package: &str,
    path: &str,
    title: &str,
) {
    out.push_str(&format!("{rank:>3}. [{score:.3}] {package}:{path}\n"));
    if !title.is_empty() {
        out.push_str(&format!("     {title}\n"));
    }
}

/// Render a response as a single JSON document.
pub fn format_json(response: &SearchResponse) -> Result<String> {
    Ok(serde_json::to_string_pretty(response)?)
}
