use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    persist,
};

/// Dimension of `text-embedding-3-small` vectors.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Header size: 8 bytes vector count + 4 bytes dimension.
const HEADER_SIZE: usize = 12;

/// A search hit: chunk position and squared Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub position: usize,
    pub distance: f32,
}

/// Exact nearest-neighbour index over fixed-length embeddings.
///
/// Vectors are stored contiguously; the i-th vector belongs to the chunk at
/// corpus position i.
///
/// Binary format on disk:
/// - 8 bytes: vector count N (u64 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - N * D * 4 bytes: f32 values in native byte order, row-major
#[derive(Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn count(&self) -> usize {
        self.data.len().checked_div(self.dimension).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors; they take the next positions in order.
    ///
    /// Either every vector is added or none is.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Return up to `k` nearest vectors by squared Euclidean distance.
    ///
    /// Results are ordered by ascending distance; equal distances keep the
    /// lower position first. An empty index yields no hits.
    ///
    /// # Examples
    ///
    /// ```
    /// use docchat::vector_index::VectorIndex;
    ///
    /// let mut index = VectorIndex::new(2);
    /// index.add(&[vec![0.0, 0.0], vec![3.0, 4.0]]).unwrap();
    ///
    /// let hits = index.search(&[3.0, 4.0], 5).unwrap();
    /// assert_eq!(hits.len(), 2);
    /// assert_eq!(hits[0].position, 1);
    /// assert_eq!(hits[0].distance, 0.0);
    /// assert_eq!(hits[1].distance, 25.0);
    /// ```
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, stored)| VectorHit {
                position,
                distance: squared_l2(query, stored),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Drop vectors at or after `count`, undoing a failed ingestion.
    pub(crate) fn truncate(&mut self, count: usize) {
        self.data.truncate(count * self.dimension);
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let staged = self.stage(path)?;
        persist::commit(&staged, path)
    }

    pub(crate) fn stage(&self, path: &Path) -> Result<PathBuf> {
        let payload: &[u8] = bytemuck::cast_slice(&self.data);
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&(self.count() as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        persist::write_temp(path, &bytes)
    }

    /// Load an index written by [`VectorIndex::persist`].
    ///
    /// The stored dimension must equal `dimension`, otherwise the
    /// artifact was produced by a different embedding model.
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let corrupt = |reason: String| Error::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt(format!(
                "file is {} bytes, shorter than its header",
                bytes.len()
            )));
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[0..8]);
        let mut dim_bytes = [0u8; 4];
        dim_bytes.copy_from_slice(&bytes[8..12]);
        let count = u64::from_le_bytes(count_bytes) as usize;
        let stored_dimension = u32::from_le_bytes(dim_bytes) as usize;

        if stored_dimension != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: stored_dimension,
            });
        }

        let payload = &bytes[HEADER_SIZE..];
        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                corrupt("header describes an impossible size".into())
            })?;
        if payload.len() != expected_len {
            return Err(corrupt(format!(
                "expected {expected_len} payload bytes for {count} vectors, found {}",
                payload.len()
            )));
        }

        let data = match bytemuck::try_cast_slice::<u8, f32>(payload) {
            Ok(values) => values.to_vec(),
            // unaligned read buffer
            Err(_) => payload
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };

        Ok(Self { dimension, data })
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .field("count", &self.count())
            .finish()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_vectors() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(&[
                vec![0.0, 0.0, 0.0],
                vec![1.0, 0.0, 0.0],
                vec![0.0, 2.0, 0.0],
                vec![0.0, 0.0, 3.0],
                vec![1.0, 1.0, 1.0],
            ])
            .unwrap();
        index
    }

    #[test]
    fn search_k3_over_five_returns_three_sorted() {
        let index = five_vectors();
        let hits = index.search(&[0.9, 0.1, 0.0], 3).unwrap();

        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(hits[0].position, 1);
        assert!(hits.iter().all(|h| h.distance >= 0.0));
    }

    #[test]
    fn exact_match_has_zero_distance() {
        let index = five_vectors();
        let hits = index.search(&[0.0, 2.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].position, 2);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn ties_prefer_lower_position() {
        let mut index = VectorIndex::new(2);
        index
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]])
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[0.0, 0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn k_larger_than_count_returns_all() {
        let index = five_vectors();
        assert_eq!(index.search(&[0.0, 0.0, 0.0], 50).unwrap().len(), 5);
    }

    #[test]
    fn add_rejects_wrong_dimension_without_partial_insert() {
        let mut index = VectorIndex::new(2);
        let err = index.add(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let index = five_vectors();
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn persist_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let index = five_vectors();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path, 3).unwrap();
        assert_eq!(loaded.count(), 5);
        assert_eq!(loaded.data, index.data);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            HEADER_SIZE + 5 * 3 * 4
        );
    }

    #[test]
    fn load_rejects_other_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        five_vectors().persist(&path).unwrap();

        assert!(matches!(
            VectorIndex::load(&path, 1536),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn load_rejects_truncated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        five_vectors().persist(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path, 3),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn truncate_drops_trailing_vectors() {
        let mut index = five_vectors();
        index.truncate(2);
        assert_eq!(index.count(), 2);
        assert_eq!(index.search(&[0.0, 0.0, 3.0], 10).unwrap().len(), 2);
    }
}
