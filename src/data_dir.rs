use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "DOCCHAT_DATA_DIR";

const APP_NAME: &str = "docchat";
const CORPUS_FILE: &str = "corpus.json";
const VECTORS_FILE: &str = "vectors.bin";

/// The two files a knowledge store is saved as.
///
/// They are only meaningful together: chunk `i` in the corpus owns vector
/// `i` in the vector file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Chunk texts, in position order.
    pub corpus: PathBuf,
    /// Embeddings, one per chunk position.
    pub vectors: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(root: &Path) -> Self {
        Self {
            corpus: root.join(CORPUS_FILE),
            vectors: root.join(VECTORS_FILE),
        }
    }

    /// Whether the corpus and vector files exist, in that order.
    pub fn present(&self) -> (bool, bool) {
        (self.corpus.is_file(), self.vectors.is_file())
    }
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the data directory and make sure it exists.
    ///
    /// An explicit path wins, then `DOCCHAT_DATA_DIR`, then
    /// `$XDG_DATA_HOME/docchat`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => default_root()?,
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> ArtifactPaths {
        ArtifactPaths::in_dir(&self.root)
    }
}

fn default_root() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV_VAR)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    xdg::BaseDirectories::with_prefix(APP_NAME)
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}
