//! The corpus, vector index and lexical index kept in lockstep.
//!
//! Position `i` in each structure names the same chunk. All three live
//! behind one lock: ingestion holds the write side across append, lexical
//! rebuild and persistence, so readers never observe a half-applied
//! ingestion.

use std::{
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    corpus::CorpusStore,
    data_dir::{ArtifactPaths, DataDir},
    error::{Error, Result},
    lexical_index::LexicalIndex,
    persist,
    vector_index::VectorIndex,
};

/// The three position-aligned structures.
#[derive(Debug)]
pub struct Indexes {
    pub corpus: CorpusStore,
    pub vectors: VectorIndex,
    pub lexical: LexicalIndex,
}

impl Indexes {
    fn empty(dimension: usize) -> Self {
        Self {
            corpus: CorpusStore::new(),
            vectors: VectorIndex::new(dimension),
            lexical: LexicalIndex::new(),
        }
    }

    /// Whether all three structures describe the same number of chunks.
    pub fn is_aligned(&self) -> bool {
        let n = self.corpus.len();
        self.vectors.count() == n && self.lexical.len() == n
    }
}

/// Corpus size and lexical readiness, as reported by the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub lexical_index_ready: bool,
}

/// Owns the indexes and their on-disk artifacts.
#[derive(Debug)]
pub struct KnowledgeStore {
    indexes: RwLock<Indexes>,
    paths: ArtifactPaths,
}

impl KnowledgeStore {
    /// Load the corpus and vector artifacts from `data_dir`, or start empty
    /// when neither exists.
    ///
    /// Fails with [`Error::IndexMisalignment`] when only one artifact exists
    /// or their counts disagree; serving from such a pair would return the
    /// wrong chunk for a vector hit.
    pub fn open(data_dir: &DataDir, dimension: usize) -> Result<Self> {
        Self::open_artifacts(data_dir.artifacts(), dimension)
    }

    pub fn open_artifacts(
        paths: ArtifactPaths,
        dimension: usize,
    ) -> Result<Self> {
        let ArtifactPaths {
            corpus: corpus_path,
            vectors: vectors_path,
        } = &paths;
        persist::discard(&persist::temp_path(corpus_path));
        persist::discard(&persist::temp_path(vectors_path));

        let indexes = match paths.present() {
            (false, false) => {
                info!(
                    dir = %parent_display(corpus_path),
                    "no saved corpus found, starting empty"
                );
                Indexes::empty(dimension)
            }
            (true, true) => {
                let corpus = CorpusStore::load(corpus_path)?;
                let vectors = VectorIndex::load(vectors_path, dimension)?;
                if corpus.len() != vectors.count() {
                    error!(
                        corpus = %corpus_path.display(),
                        corpus_chunks = corpus.len(),
                        vectors = %vectors_path.display(),
                        vector_count = vectors.count(),
                        "corpus and vector index disagree; the artifact with \
                         fewer entries is stale"
                    );
                    return Err(Error::IndexMisalignment {
                        corpus: corpus.len(),
                        vectors: vectors.count(),
                    });
                }

                let mut lexical = LexicalIndex::new();
                lexical.rebuild(corpus.all())?;
                info!(chunks = corpus.len(), "loaded corpus from disk");
                Indexes {
                    corpus,
                    vectors,
                    lexical,
                }
            }
            (corpus_exists, _) => {
                let (corpus, vectors) = if corpus_exists {
                    (CorpusStore::load(corpus_path)?.len(), 0)
                } else {
                    (0, VectorIndex::load(vectors_path, dimension)?.count())
                };
                error!(
                    corpus = %corpus_path.display(),
                    corpus_exists,
                    vectors = %vectors_path.display(),
                    vectors_exist = !corpus_exists,
                    "only one of the two artifacts is present"
                );
                return Err(Error::IndexMisalignment { corpus, vectors });
            }
        };

        Ok(Self {
            indexes: RwLock::new(indexes),
            paths,
        })
    }

    /// Append chunks from one document with their embeddings.
    ///
    /// Holds the write lock across append, lexical rebuild and persistence.
    /// On any failure the in-memory state is rolled back and the files on
    /// disk keep their previous contents.
    pub fn append(
        &self,
        source_document: &str,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<usize>> {
        if texts.len() != embeddings.len() {
            return Err(Error::IndexMisalignment {
                corpus: texts.len(),
                vectors: embeddings.len(),
            });
        }

        let mut guard = self.write()?;
        let indexes = &mut *guard;
        let previous = indexes.corpus.len();

        indexes.vectors.add(&embeddings)?;
        let positions = indexes.corpus.append(texts, source_document);

        let applied = match indexes.lexical.rebuild(indexes.corpus.all()) {
            Ok(()) => self.persist(indexes).map_err(|e| (e, true)),
            Err(e) => Err((e, false)),
        };

        if let Err((e, touched_disk)) = applied {
            warn!(
                source_document,
                error = %e,
                "ingestion failed, rolling back to {previous} chunks"
            );
            indexes.corpus.truncate(previous);
            indexes.vectors.truncate(previous);
            if let Err(rebuild_err) =
                indexes.lexical.rebuild(indexes.corpus.all())
            {
                error!(error = %rebuild_err, "lexical rollback failed");
            }
            if touched_disk {
                self.restore_vectors(&indexes.vectors);
            }
            return Err(e);
        }

        debug_assert!(indexes.is_aligned());
        info!(
            source_document,
            added = positions.len(),
            total = indexes.corpus.len(),
            "ingested document"
        );
        Ok(positions)
    }

    /// Run `f` against a consistent view of the indexes.
    ///
    /// Blocks while an ingestion holds the write lock.
    pub fn read<R>(&self, f: impl FnOnce(&Indexes) -> R) -> Result<R> {
        let guard: RwLockReadGuard<'_, Indexes> = self
            .indexes
            .read()
            .map_err(|_| Error::LockPoisoned("knowledge store"))?;
        Ok(f(&guard))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.read(|indexes| StoreStats {
            total_chunks: indexes.corpus.len(),
            lexical_index_ready: indexes.lexical.is_initialized(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Indexes>> {
        self.indexes
            .write()
            .map_err(|_| Error::LockPoisoned("knowledge store"))
    }

    /// Stage both artifacts, then swap them in: vectors first, corpus last.
    ///
    /// If the process dies between the two renames the counts on disk
    /// disagree and the next [`KnowledgeStore::open`] refuses to serve.
    fn persist(&self, indexes: &Indexes) -> Result<()> {
        let staged_vectors = indexes.vectors.stage(&self.paths.vectors)?;
        let staged_corpus = match indexes.corpus.stage(&self.paths.corpus) {
            Ok(path) => path,
            Err(e) => {
                persist::discard(&staged_vectors);
                return Err(e);
            }
        };

        if let Err(e) = persist::commit(&staged_vectors, &self.paths.vectors) {
            persist::discard(&staged_vectors);
            persist::discard(&staged_corpus);
            return Err(e);
        }
        if let Err(e) = persist::commit(&staged_corpus, &self.paths.corpus) {
            error!(
                corpus = %self.paths.corpus.display(),
                error = %e,
                "vector index was saved but the corpus was not"
            );
            persist::discard(&staged_corpus);
            return Err(e);
        }
        Ok(())
    }

    /// Put the vector artifact back in step with the corpus on disk after
    /// a failed save, which may have swapped in the new vectors already.
    fn restore_vectors(&self, vectors: &VectorIndex) {
        let restored = if vectors.is_empty() && !self.paths.corpus.is_file() {
            match std::fs::remove_file(&self.paths.vectors) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(e.into())
                }
                _ => Ok(()),
            }
        } else {
            vectors.persist(&self.paths.vectors)
        };

        if let Err(e) = restored {
            error!(
                vectors = %self.paths.vectors.display(),
                error = %e,
                "could not restore the vector index; the next open will \
                 report misalignment"
            );
        }
    }
}

fn parent_display(path: &Path) -> String {
    path.parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}
