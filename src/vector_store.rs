use std::path::{Path, PathBuf};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    embedding::{Provenance, check_embedding},
    error::{Error, Result},
    fusion::RankedResult,
};

const DB_FILE: &str = "vectors.redb";
const PROVENANCE_KEY: &str = "provenance";

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const RECORDS: TableDefinition<u64, &str> = TableDefinition::new("records");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

/// One chunk's embedding plus the fields needed to render a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub path: String,
    pub package: String,
    pub title: String,
    pub content: String,
}

impl IndexedVector {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            embedding,
            path: chunk.path.clone(),
            package: chunk.package.clone(),
            title: chunk.metadata.title.clone(),
            content: chunk.content.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    chunk_id: String,
    path: String,
    package: String,
    title: String,
    content: String,
}

/// Exact nearest-neighbour index over chunk embeddings.
///
/// Persisted as a directory holding a single redb database:
/// - `vectors`: row number → embedding as raw f32 bytes (host byte order)
/// - `records`: row number → JSON chunk fields
/// - `meta`: `provenance` → JSON [`Provenance`]
///
/// The full set of vectors is loaded into memory on open and scanned
/// linearly (in parallel) on search.
pub struct VectorIndex {
    dir: PathBuf,
    provenance: Option<Provenance>,
    records: Vec<IndexedVector>,
}

impl VectorIndex {
    /// Whether a vector store has been written under `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(DB_FILE).is_file()
    }

    /// Load a previously built store.
    pub fn open(dir: &Path) -> Result<Self> {
        if !Self::exists(dir) {
            return Err(Error::NotFound {
                kind: "vector index",
                name: dir.display().to_string(),
            });
        }

        let db = Database::open(dir.join(DB_FILE))?;
        let txn = db.begin_read()?;

        let meta = txn.open_table(META)?;
        let provenance = match meta.get(PROVENANCE_KEY)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };

        let records_table = txn.open_table(RECORDS)?;
        let vectors_table = txn.open_table(VECTORS)?;

        let mut records = Vec::new();
        for entry in records_table.iter()? {
            let (row, value) = entry?;
            let stored: StoredRecord = serde_json::from_str(value.value())?;
            let guard = vectors_table.get(row.value())?.ok_or_else(|| {
                Error::Config(format!(
                    "vector index row {} has no embedding",
                    row.value()
                ))
            })?;
            let embedding = decode_embedding(guard.value())?;

            records.push(IndexedVector {
                chunk_id: stored.chunk_id,
                embedding,
                path: stored.path,
                package: stored.package,
                title: stored.title,
                content: stored.content,
            });
        }

        tracing::debug!(
            vectors = records.len(),
            dir = %dir.display(),
            "opened vector index"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            provenance,
            records,
        })
    }

    /// Write `records` under `dir`, replacing any existing store.
    ///
    /// Every embedding must have `provenance.dimensions` components.
    pub fn build(
        dir: &Path,
        records: Vec<IndexedVector>,
        provenance: Provenance,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        for record in &records {
            check_embedding(provenance.dimensions, &record.embedding)?;
        }

        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);
        if db_path.exists() {
            std::fs::remove_file(&db_path)?;
        }

        let db = Database::create(&db_path)?;
        let txn = db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let encoded = serde_json::to_string(&provenance)?;
            meta.insert(PROVENANCE_KEY, encoded.as_str())?;

            let mut records_table = txn.open_table(RECORDS)?;
            let mut vectors_table = txn.open_table(VECTORS)?;
            for (row, record) in records.iter().enumerate() {
                let row = row as u64;
                let stored = serde_json::to_string(&StoredRecord {
                    chunk_id: record.chunk_id.clone(),
                    path: record.path.clone(),
                    package: record.package.clone(),
                    title: record.title.clone(),
                    content: record.content.clone(),
                })?;
                records_table.insert(row, stored.as_str())?;
                vectors_table.insert(
                    row,
                    bytemuck::cast_slice::<f32, u8>(&record.embedding),
                )?;
            }
        }
        txn.commit()?;

        tracing::info!(
            vectors = records.len(),
            provenance = %provenance,
            "built vector index"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            provenance: Some(provenance),
            records,
        })
    }

    /// Provenance stamped at build time, if the store carries one.
    pub fn metadata(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Same index after its directory was moved to `dir`.
    pub(crate) fn relocated(self, dir: PathBuf) -> Self {
        Self { dir, ..self }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `limit` nearest neighbours of `query` by Euclidean distance.
    ///
    /// Scores are `1 / (1 + distance)`: positive, and higher for closer
    /// neighbours. Equal distances are ordered by chunk id.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        self.search_in_packages(query, &[], limit)
    }

    /// Like [`Self::search`], restricted to records whose package is in
    /// `packages`. An empty slice does not filter.
    pub fn search_in_packages(
        &self,
        query: &[f32],
        packages: &[String],
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        if let Some(provenance) = &self.provenance {
            check_embedding(provenance.dimensions, query)?;
        } else if let Some(first) = self.records.first() {
            check_embedding(first.embedding.len(), query)?;
        }

        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .par_iter()
            .enumerate()
            .filter(|(_, record)| {
                packages.is_empty() || packages.contains(&record.package)
            })
            .map(|(i, record)| (i, euclidean_distance(query, &record.embedding)))
            .collect();

        // total_cmp sorts NaN distances after every finite one.
        scored.sort_by(|a, b| {
            a.1.total_cmp(&b.1).then_with(|| {
                self.records[a.0].chunk_id.cmp(&self.records[b.0].chunk_id)
            })
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(i, distance)| {
                let record = &self.records[i];
                RankedResult {
                    id: record.chunk_id.clone(),
                    content: record.content.clone(),
                    path: record.path.clone(),
                    package: record.package.clone(),
                    title: record.title.clone(),
                    score: distance_to_score(distance),
                }
            })
            .collect())
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dir", &self.dir)
            .field("provenance", &self.provenance)
            .field("vectors", &self.records.len())
            .finish()
    }
}

/// Map a distance to a similarity in `(0, 1]`.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Config(format!(
            "corrupt embedding of {} bytes",
            bytes.len()
        )));
    }
    // redb values carry no alignment guarantee, so copy rather than cast.
    Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(dimensions: usize) -> Provenance {
        Provenance {
            provider: "test".to_string(),
            model: "unit".to_string(),
            dimensions,
        }
    }

    fn record(id: &str, embedding: Vec<f32>) -> IndexedVector {
        IndexedVector {
            chunk_id: id.to_string(),
            embedding,
            path: format!("{}.md", id.split('#').next().unwrap()),
            package: "pkg".to_string(),
            title: id.to_uppercase(),
            content: format!("content {id}"),
        }
    }

    fn sample(dir: &Path) -> VectorIndex {
        VectorIndex::build(
            dir,
            vec![
                record("a#0", vec![1.0, 0.0, 0.0]),
                record("b#0", vec![0.0, 1.0, 0.0]),
                record("c#0", vec![0.0, 0.0, 1.0]),
            ],
            provenance(3),
        )
        .unwrap()
    }

    #[test]
    fn exists_reflects_build() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("vectors");
        assert!(!VectorIndex::exists(&dir));
        sample(&dir);
        assert!(VectorIndex::exists(&dir));
    }

    #[test]
    fn open_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = VectorIndex::open(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn nearest_neighbour_ranks_first() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());

        let results = idx.search(&[0.9, 0.1, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "a#0");
        assert_eq!(results[0].path, "a.md");
        assert_eq!(results[0].content, "content a#0");
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn exact_match_scores_one() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());
        let results = idx.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "b#0");
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn score_is_inverse_distance() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(1.0), 0.5);
        assert!(distance_to_score(3.0) > 0.0);
    }

    #[test]
    fn ties_order_by_chunk_id() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());
        // Equidistant from every stored vector.
        let results = idx.search(&[0.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a#0", "b#0", "c#0"]);
    }

    #[test]
    fn query_dimension_must_match() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());
        let err = idx.search(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn build_rejects_wrong_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let err = VectorIndex::build(
            tmp.path(),
            vec![record("a#0", vec![1.0, 0.0])],
            provenance(3),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn build_rejects_non_finite_embedding() {
        let tmp = tempfile::tempdir().unwrap();
        let err = VectorIndex::build(
            tmp.path(),
            vec![
                record("a#0", vec![1.0, 0.0, 0.0]),
                record("b#0", vec![f32::NAN, 0.0, 0.0]),
            ],
            provenance(3),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(!VectorIndex::exists(tmp.path()));
    }

    #[test]
    fn non_finite_query_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());
        assert!(idx.search(&[f32::NAN, 0.0, 0.0], 3).is_err());
    }

    #[test]
    fn nan_rows_never_outrank_finite_neighbours() {
        let records = (0..200)
            .map(|i| {
                let embedding = if i % 3 == 0 {
                    vec![f32::NAN, 0.0]
                } else {
                    vec![i as f32, 0.0]
                };
                record(&format!("d{i:03}#0"), embedding)
            })
            .collect();
        let idx = VectorIndex {
            dir: PathBuf::from("unused"),
            provenance: None,
            records,
        };

        let top = idx.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].id, "d001#0");
        for hit in &top {
            assert!(hit.score.is_finite(), "{} scored {}", hit.id, hit.score);
        }
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let embedding = vec![1.5_f32, -0.25, 3.0e-8, 42.0];
        let bytes = bytemuck::cast_slice::<f32, u8>(&embedding);
        assert_eq!(decode_embedding(bytes).unwrap(), embedding);

        // Offset by one byte to exercise an unaligned source.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(bytes);
        assert_eq!(decode_embedding(&shifted[1..]).unwrap(), embedding);

        assert!(decode_embedding(&bytes[..5]).is_err());
    }

    #[test]
    fn build_rejects_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let err =
            VectorIndex::build(tmp.path(), Vec::new(), provenance(3)).unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus));
    }

    #[test]
    fn reopen_preserves_vectors_and_provenance() {
        let tmp = tempfile::tempdir().unwrap();
        let built = sample(tmp.path());
        let query = [0.2, 0.7, 0.1];
        let expected = built.search(&query, 3).unwrap();
        drop(built);

        let reopened = VectorIndex::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.metadata(), Some(&provenance(3)));
        assert_eq!(reopened.search(&query, 3).unwrap(), expected);
    }

    #[test]
    fn rebuild_replaces_previous_store() {
        let tmp = tempfile::tempdir().unwrap();
        sample(tmp.path());
        VectorIndex::build(
            tmp.path(),
            vec![record("z#0", vec![1.0, 1.0])],
            provenance(2),
        )
        .unwrap();

        let reopened = VectorIndex::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.metadata().unwrap().dimensions, 2);
    }

    #[test]
    fn package_filter_restricts_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut other = record("d#0", vec![1.0, 0.0, 0.0]);
        other.package = "other".to_string();
        let idx = VectorIndex::build(
            tmp.path(),
            vec![record("a#0", vec![0.0, 1.0, 0.0]), other],
            provenance(3),
        )
        .unwrap();

        let all = idx.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(all[0].id, "d#0");

        let filtered = idx
            .search_in_packages(&[1.0, 0.0, 0.0], &["pkg".to_string()], 5)
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "a#0");
    }

    #[test]
    fn limit_zero_returns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = sample(tmp.path());
        assert!(idx.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }
}
