use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    lexical::LexicalIndex,
    vector_store::VectorIndex,
};

/// An immutable pair of indexes built from the same set of chunks.
#[derive(Debug)]
pub struct IndexSnapshot {
    lexical: LexicalIndex,
    vector: Option<VectorIndex>,
}

impl IndexSnapshot {
    pub fn new(lexical: LexicalIndex, vector: Option<VectorIndex>) -> Self {
        Self { lexical, vector }
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vector(&self) -> Option<&VectorIndex> {
        self.vector.as_ref()
    }

    /// Read the persisted lexical artifact and, if present, the vector
    /// store.
    pub fn load(data_dir: &DataDir) -> Result<Self> {
        let lexical = LexicalIndex::load(&data_dir.lexical_artifact())?;
        let vector_dir = data_dir.vector_dir();
        let vector = if VectorIndex::exists(&vector_dir) {
            Some(VectorIndex::open(&vector_dir)?)
        } else {
            None
        };
        Ok(Self { lexical, vector })
    }
}

/// Lifecycle of an [`IndexHandle`].
///
/// `Empty → Building → Ready` for a fresh build, `NotLoaded → Ready` or
/// `NotLoaded → LoadFailed` for a restore. Only `Ready` serves queries.
#[derive(Debug, Clone)]
pub enum IndexState {
    Empty,
    Building,
    NotLoaded,
    LoadFailed(String),
    Ready(Arc<IndexSnapshot>),
}

impl IndexState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Building => "building",
            Self::NotLoaded => "not loaded",
            Self::LoadFailed(_) => "load failed",
            Self::Ready(_) => "ready",
        }
    }
}

/// Shared handle to the current index snapshot.
///
/// Readers take an `Arc` of the snapshot and drop the lock immediately, so
/// a rebuild never blocks on in-flight queries and queries never see a
/// partially built index. A rebuild of a `Ready` handle keeps serving the
/// previous snapshot until the new one is installed.
#[derive(Debug)]
pub struct IndexHandle {
    state: RwLock<IndexState>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexHandle {
    /// A handle with nothing built yet.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::Empty),
        }
    }

    /// A handle waiting for [`Self::load`].
    pub fn not_loaded() -> Self {
        Self {
            state: RwLock::new(IndexState::NotLoaded),
        }
    }

    pub fn ready(snapshot: IndexSnapshot) -> Self {
        Self {
            state: RwLock::new(IndexState::Ready(Arc::new(snapshot))),
        }
    }

    pub fn state(&self) -> IndexState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), IndexState::Ready(_))
    }

    /// The current snapshot, or `NotReady` outside the `Ready` state.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            IndexState::Ready(snapshot) => Ok(Arc::clone(snapshot)),
            other => Err(Error::NotReady {
                state: other.name(),
            }),
        }
    }

    /// Mark a build as started and return the state it replaced. A `Ready`
    /// handle stays `Ready`.
    pub fn begin_build(&self) -> IndexState {
        let mut state =
            self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, IndexState::Ready(_)) {
            state.clone()
        } else {
            std::mem::replace(&mut *state, IndexState::Building)
        }
    }

    /// Abandon a build started with [`Self::begin_build`], restoring the
    /// state it returned.
    pub fn abort_build(&self, previous: IndexState) {
        let mut state =
            self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, IndexState::Building) {
            *state = previous;
        }
    }

    /// Atomically replace whatever the handle holds with `snapshot`.
    pub fn install(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            IndexState::Ready(Arc::clone(&snapshot));
        snapshot
    }

    /// Restore persisted indexes from `data_dir`.
    ///
    /// On failure the handle moves to `LoadFailed` and the error is
    /// returned.
    pub fn load(&self, data_dir: &DataDir) -> Result<()> {
        match IndexSnapshot::load(data_dir) {
            Ok(snapshot) => {
                tracing::debug!(
                    chunks = snapshot.lexical().len(),
                    vectors = snapshot.vector().map_or(0, VectorIndex::len),
                    "loaded index snapshot"
                );
                self.install(snapshot);
                Ok(())
            }
            Err(e) => {
                *self.state.write().unwrap_or_else(PoisonError::into_inner) =
                    IndexState::LoadFailed(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunk, ChunkMetadata};

    fn lexical() -> LexicalIndex {
        LexicalIndex::build(vec![Chunk {
            id: "a.md#0".to_string(),
            content: "tantivy powers the keyword side".to_string(),
            path: "a.md".to_string(),
            package: "pkg".to_string(),
            headings: vec!["A".to_string()],
            metadata: ChunkMetadata {
                title: "A".to_string(),
                ..Default::default()
            },
        }])
        .unwrap()
    }

    #[test]
    fn empty_handle_is_not_ready() {
        let handle = IndexHandle::new();
        let err = handle.snapshot().unwrap_err();
        assert!(matches!(err, Error::NotReady { state: "empty" }));
    }

    #[test]
    fn build_lifecycle() {
        let handle = IndexHandle::new();
        handle.begin_build();
        assert!(matches!(handle.state(), IndexState::Building));
        assert!(matches!(
            handle.snapshot().unwrap_err(),
            Error::NotReady { state: "building" }
        ));

        handle.install(IndexSnapshot::new(lexical(), None));
        assert!(handle.is_ready());
        assert_eq!(handle.snapshot().unwrap().lexical().len(), 1);
    }

    #[test]
    fn aborted_build_returns_to_empty() {
        let handle = IndexHandle::new();
        let previous = handle.begin_build();
        handle.abort_build(previous);
        assert!(matches!(handle.state(), IndexState::Empty));
    }

    #[test]
    fn aborted_build_keeps_load_failure_reason() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let handle = IndexHandle::not_loaded();
        assert!(handle.load(&data_dir).is_err());
        let IndexState::LoadFailed(reason) = handle.state() else {
            panic!("expected load failure");
        };

        let previous = handle.begin_build();
        assert!(matches!(handle.state(), IndexState::Building));
        handle.abort_build(previous);

        let IndexState::LoadFailed(restored) = handle.state() else {
            panic!("load failure was not restored");
        };
        assert_eq!(restored, reason);
    }

    #[test]
    fn aborted_build_restores_not_loaded() {
        let handle = IndexHandle::not_loaded();
        let previous = handle.begin_build();
        handle.abort_build(previous);
        assert!(matches!(handle.state(), IndexState::NotLoaded));
    }

    #[test]
    fn rebuild_keeps_serving_previous_snapshot() {
        let handle = IndexHandle::ready(IndexSnapshot::new(lexical(), None));
        let before = handle.snapshot().unwrap();

        handle.begin_build();
        assert!(handle.is_ready());

        handle.install(IndexSnapshot::new(lexical(), None));
        let after = handle.snapshot().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        // Readers holding the old snapshot are unaffected.
        assert_eq!(before.lexical().len(), 1);
    }

    #[test]
    fn load_missing_artifact_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let handle = IndexHandle::not_loaded();
        assert!(matches!(
            handle.snapshot().unwrap_err(),
            Error::NotReady { state: "not loaded" }
        ));

        assert!(handle.load(&data_dir).is_err());
        assert!(matches!(handle.state(), IndexState::LoadFailed(_)));
        assert!(matches!(
            handle.snapshot().unwrap_err(),
            Error::NotReady {
                state: "load failed"
            }
        ));
    }

    #[test]
    fn load_restores_saved_lexical_index() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        lexical().save(&data_dir.lexical_artifact()).unwrap();

        let handle = IndexHandle::not_loaded();
        handle.load(&data_dir).unwrap();

        let snapshot = handle.snapshot().unwrap();
        assert!(snapshot.vector().is_none());
        let hits = snapshot
            .lexical()
            .search("keyword", &Default::default(), 5)
            .unwrap();
        assert_eq!(hits[0].id, "a.md#0");
    }
}
