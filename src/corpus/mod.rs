//! The searchable image collection.
//!
//! A corpus is an ordered, immutable list of unit-length embeddings. The
//! position of a vector is its item id; ids come from the lexicographic
//! order of the vector file names, so reloading an unchanged directory always
//! yields the same ids.

use std::path::Path;

use rayon::prelude::*;

use crate::engine::scores::{distance, l2_norm, ItemId, ScoreVector};
use crate::storage::{BackendLocal, StorageManager};

mod labels;
mod storage;
mod video;

pub use labels::ClassLabels;
pub use storage::{VectorFile, VectorFileError};
pub use video::VideoBounds;

/// Extension of the per-item vector files.
pub const VECTOR_FILE_EXT: &str = ".vec";

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}: {source}")]
    File {
        file: String,
        #[source]
        source: VectorFileError,
    },

    #[error("Corpus is empty")]
    Empty,

    #[error("Dimension mismatch at item {id}: expected {expected}, got {got}")]
    DimensionMismatch { id: ItemId, expected: usize, got: usize },

    #[error("Item {0} has a zero-norm vector")]
    ZeroNormVector(ItemId),

    #[error("Invalid video bounds: {0}")]
    InvalidVideoBounds(String),

    #[error("Invalid class labels: {0}")]
    InvalidLabels(String),
}

pub struct Corpus {
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl Corpus {
    /// Build a corpus from raw vectors. Vectors are normalised to unit length.
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self, CorpusError> {
        let dimensions = vectors.first().map(Vec::len).ok_or(CorpusError::Empty)?;

        let vectors = vectors
            .into_iter()
            .enumerate()
            .map(|(id, v)| {
                if v.len() != dimensions {
                    return Err(CorpusError::DimensionMismatch {
                        id,
                        expected: dimensions,
                        got: v.len(),
                    });
                }
                let norm = l2_norm(&v);
                if norm < f32::EPSILON {
                    return Err(CorpusError::ZeroNormVector(id));
                }
                Ok(v.into_iter().map(|x| x / norm).collect())
            })
            .collect::<Result<Vec<Vec<f32>>, _>>()?;

        Ok(Self {
            vectors,
            dimensions,
        })
    }

    /// Load every `*.vec` file of `dir`, in file name order.
    pub fn load(dir: impl AsRef<Path>, model_id: &[u8; 32]) -> Result<Self, CorpusError> {
        let store = BackendLocal::open(dir)?;

        let names: Vec<String> = store
            .list()?
            .into_iter()
            .filter(|name| name.ends_with(VECTOR_FILE_EXT))
            .collect();

        log::info!(
            "loading {} vectors from {}",
            names.len(),
            store.base_dir.display()
        );

        let vectors = names
            .into_iter()
            .map(|name| -> Result<Vec<f32>, CorpusError> {
                let bytes = store.read(&name)?;
                VectorFile::decode(&bytes, model_id)
                    .map(|file| file.embedding)
                    .map_err(|source| CorpusError::File { file: name, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_vectors(vectors)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn get(&self, id: ItemId) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Distance of every item to `query`, a full pass over the corpus.
    pub fn distances(&self, query: &[f32]) -> ScoreVector {
        ScoreVector::from_vec(
            self.vectors
                .par_iter()
                .map(|item| distance(item, query))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_corpus() -> Corpus {
        Corpus::from_vectors(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap()
    }

    fn write_corpus(dir: &Path, model_id: &[u8; 32], vectors: &[Vec<f32>]) {
        let store = BackendLocal::new(dir).unwrap();
        for (idx, v) in vectors.iter().enumerate() {
            let file = VectorFile::new(*model_id, v.clone());
            store
                .write(&VectorFile::file_name(idx + 1, vectors.len()), &file.encode())
                .unwrap();
        }
    }

    #[test]
    fn test_raw_scores_for_axis_query() {
        let corpus = identity_corpus();
        let scores = corpus.distances(&[1.0, 0.0, 0.0]);
        assert_eq!(scores.as_slice(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_vectors_are_normalised() {
        let corpus = Corpus::from_vectors(vec![vec![3.0, 4.0]]).unwrap();
        let v = corpus.get(0).unwrap();
        assert!((l2_norm(v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(Corpus::from_vectors(vec![]), Err(CorpusError::Empty)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = Corpus::from_vectors(vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]);
        assert!(matches!(
            result,
            Err(CorpusError::DimensionMismatch { id: 1, expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_zero_norm_rejected() {
        let result = Corpus::from_vectors(vec![vec![1.0, 0.0], vec![0.0, 0.0]]);
        assert!(matches!(result, Err(CorpusError::ZeroNormVector(1))));
    }

    #[test]
    fn test_load_orders_by_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let model_id = [7u8; 32];
        let store = BackendLocal::new(tmp.path()).unwrap();

        // written out of order on purpose
        for (name, v) in [
            ("00003.vec", vec![0.0, 0.0, 1.0]),
            ("00001.vec", vec![1.0, 0.0, 0.0]),
            ("00002.vec", vec![0.0, 1.0, 0.0]),
        ] {
            store
                .write(name, &VectorFile::new(model_id, v).encode())
                .unwrap();
        }
        store.write("README.txt", b"not a vector").unwrap();

        let corpus = Corpus::load(tmp.path(), &model_id).unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.get(0).unwrap(), &[1.0f32, 0.0, 0.0]);
        assert_eq!(corpus.get(2).unwrap(), &[0.0f32, 0.0, 1.0]);
    }

    #[test]
    fn test_repeated_loads_assign_same_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let model_id = [1u8; 32];
        let vectors: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![1.0, i as f32 * 0.1, (20 - i) as f32 * 0.05])
            .collect();
        write_corpus(tmp.path(), &model_id, &vectors);

        let first = Corpus::load(tmp.path(), &model_id).unwrap();
        let second = Corpus::load(tmp.path(), &model_id).unwrap();

        assert_eq!(first.len(), second.len());
        for id in 0..first.len() {
            assert_eq!(first.get(id), second.get(id));
        }
    }

    #[test]
    fn test_load_with_wrong_model_fails() {
        let tmp = tempfile::tempdir().unwrap();
        write_corpus(tmp.path(), &[1u8; 32], &[vec![1.0, 0.0]]);

        let result = Corpus::load(tmp.path(), &[2u8; 32]);
        assert!(matches!(
            result,
            Err(CorpusError::File {
                source: VectorFileError::ModelMismatch,
                ..
            })
        ));
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Corpus::load(tmp.path().join("nope"), &[0u8; 32]);
        assert!(matches!(result, Err(CorpusError::Io(_))));
    }
}
