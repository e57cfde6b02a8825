use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::{error::Result, store::Indexes};

/// Which index surfaced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "index", rename_all = "lowercase")]
pub enum MatchKind {
    Lexical { score: f32 },
    Vector { distance: f32 },
}

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub position: usize,
    pub text: String,
    #[serde(flatten)]
    pub kind: MatchKind,
}

/// Fused retrieval output: lexical hits in score order, then vector hits
/// the lexical pass did not already return. No position appears twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk texts in result order.
    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }

    pub fn positions(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.position).collect()
    }
}

/// Combines BM25 and nearest-neighbour search.
///
/// `max_distance` optionally rejects vector hits whose squared distance is
/// above it. There is no principled default: a low value favours precision,
/// a high one recall, so it is left unset unless configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridRetriever {
    max_distance: Option<f32>,
}

impl HybridRetriever {
    pub fn new(max_distance: Option<f32>) -> Self {
        Self { max_distance }
    }

    pub fn max_distance(&self) -> Option<f32> {
        self.max_distance
    }

    /// Retrieve up to `2k` distinct chunks for a query.
    ///
    /// Lexical hits come first in descending score order; vector hits
    /// follow in ascending distance order, skipping positions already
    /// taken. Returns an empty result when neither index matches.
    pub fn retrieve(
        &self,
        indexes: &Indexes,
        query_text: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<RetrievalResult> {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();

        // Stage 1: BM25
        for hit in indexes.lexical.top_k(query_text, k)? {
            let chunk = indexes.corpus.get(hit.position)?;
            debug!(position = hit.position, score = hit.score, "lexical hit");
            seen.insert(hit.position);
            chunks.push(RetrievedChunk {
                position: hit.position,
                text: chunk.text.clone(),
                kind: MatchKind::Lexical { score: hit.score },
            });
        }

        // Stage 2: nearest neighbours not already found
        for hit in indexes.vectors.search(query_vector, k)? {
            debug!(
                position = hit.position,
                distance = hit.distance,
                "vector hit"
            );
            if let Some(max) = self.max_distance
                && hit.distance > max
            {
                debug!(
                    position = hit.position,
                    max_distance = max,
                    "rejected by distance threshold"
                );
                continue;
            }
            if !seen.insert(hit.position) {
                continue;
            }
            let chunk = indexes.corpus.get(hit.position)?;
            chunks.push(RetrievedChunk {
                position: hit.position,
                text: chunk.text.clone(),
                kind: MatchKind::Vector {
                    distance: hit.distance,
                },
            });
        }

        Ok(RetrievalResult { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::CorpusStore,
        lexical_index::LexicalIndex,
        vector_index::VectorIndex,
    };

    fn indexes(entries: &[(&str, [f32; 2])]) -> Indexes {
        let mut corpus = CorpusStore::new();
        corpus.append(
            entries.iter().map(|(t, _)| t.to_string()).collect(),
            "test",
        );
        let mut vectors = VectorIndex::new(2);
        vectors
            .add(&entries.iter().map(|(_, v)| v.to_vec()).collect::<Vec<_>>())
            .unwrap();
        let mut lexical = LexicalIndex::new();
        lexical.rebuild(corpus.all()).unwrap();
        Indexes {
            corpus,
            vectors,
            lexical,
        }
    }

    #[test]
    fn lexical_hits_precede_novel_vector_hits() {
        let idx = indexes(&[
            ("apples are red", [0.0, 0.0]),
            ("bananas are yellow", [1.0, 0.0]),
            ("cherries are dark", [5.0, 5.0]),
        ]);

        let result = HybridRetriever::default()
            .retrieve(&idx, "bananas", &[0.1, 0.0], 2)
            .unwrap();

        assert_eq!(result.positions(), vec![1, 0]);
        assert!(matches!(result.chunks[0].kind, MatchKind::Lexical { .. }));
        assert!(matches!(result.chunks[1].kind, MatchKind::Vector { .. }));
    }

    #[test]
    fn overlapping_hits_are_not_duplicated() {
        let idx = indexes(&[
            ("alpha beta", [0.0, 0.0]),
            ("beta gamma", [0.0, 1.0]),
            ("delta", [9.0, 9.0]),
        ]);

        let result = HybridRetriever::default()
            .retrieve(&idx, "beta", &[0.0, 0.0], 3)
            .unwrap();

        let positions = result.positions();
        let unique: HashSet<_> = positions.iter().collect();
        assert_eq!(unique.len(), positions.len());
        assert_eq!(positions.len(), 3);
        assert!(result.len() <= 6);
    }

    #[test]
    fn result_is_capped_at_twice_k() {
        let entries: Vec<(String, [f32; 2])> = (0..10)
            .map(|i| (format!("word{} common", i), [i as f32, 0.0]))
            .collect();
        let borrowed: Vec<(&str, [f32; 2])> =
            entries.iter().map(|(t, v)| (t.as_str(), *v)).collect();
        let idx = indexes(&borrowed);

        let result = HybridRetriever::default()
            .retrieve(&idx, "word9", &[0.0, 0.0], 2)
            .unwrap();

        assert_eq!(result.positions(), vec![9, 0, 1]);
        assert!(result.len() <= 4);
    }

    #[test]
    fn distance_threshold_rejects_far_vectors() {
        let idx = indexes(&[("near", [0.0, 0.0]), ("far", [3.0, 0.0])]);

        let result = HybridRetriever::new(Some(1.0))
            .retrieve(&idx, "nothing matches", &[0.5, 0.0], 5)
            .unwrap();

        assert_eq!(result.positions(), vec![0]);
    }

    #[test]
    fn threshold_does_not_affect_lexical_hits() {
        let idx = indexes(&[("near", [0.0, 0.0]), ("far", [3.0, 0.0])]);

        let result = HybridRetriever::new(Some(0.5))
            .retrieve(&idx, "far", &[0.0, 0.0], 5)
            .unwrap();

        assert_eq!(result.positions(), vec![1, 0]);
    }

    #[test]
    fn empty_indexes_yield_empty_result() {
        let idx = indexes(&[]);
        let result = HybridRetriever::default()
            .retrieve(&idx, "anything", &[0.0, 0.0], 3)
            .unwrap();
        assert!(result.is_empty());
    }
}
