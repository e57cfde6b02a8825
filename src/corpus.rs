use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    persist,
};

/// A stored slice of document text.
///
/// `position` is assigned on append and never changes. It is the key shared
/// with the vector and lexical indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub position: usize,
    pub text: String,
    pub source_document: String,
}

#[derive(Serialize)]
struct CorpusFileRef<'a> {
    chunks: &'a [Chunk],
}

#[derive(Deserialize)]
struct CorpusFile {
    chunks: Vec<Chunk>,
}

/// Append-only, ordered collection of chunks.
#[derive(Debug, Default, Clone)]
pub struct CorpusStore {
    chunks: Vec<Chunk>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append texts from one source document and return their positions.
    ///
    /// # Examples
    ///
    /// ```
    /// use docchat::corpus::CorpusStore;
    ///
    /// let mut corpus = CorpusStore::new();
    /// let positions = corpus.append(vec!["a".into(), "b".into()], "doc.pdf");
    /// assert_eq!(positions, vec![0, 1]);
    /// assert_eq!(corpus.get(1).unwrap().text, "b");
    /// ```
    pub fn append(
        &mut self,
        texts: Vec<String>,
        source_document: &str,
    ) -> Vec<usize> {
        let start = self.chunks.len();
        self.chunks
            .extend(texts.into_iter().enumerate().map(|(i, text)| Chunk {
                position: start + i,
                text,
                source_document: source_document.to_string(),
            }));
        (start..self.chunks.len()).collect()
    }

    pub fn get(&self, position: usize) -> Result<&Chunk> {
        self.chunks.get(position).ok_or_else(|| Error::NotFound {
            kind: "chunk",
            name: position.to_string(),
        })
    }

    pub fn all(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop every chunk at or after `len`. Only used to undo a failed
    /// ingestion before it becomes visible.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.chunks.truncate(len);
    }

    /// Write the corpus as JSON via a temporary file.
    ///
    /// The live file is replaced only once the new copy is fully on disk.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let staged = self.stage(path)?;
        persist::commit(&staged, path)
    }

    /// Write the corpus next to `path` without replacing the live file.
    pub(crate) fn stage(&self, path: &Path) -> Result<PathBuf> {
        let bytes = serde_json::to_vec(&CorpusFileRef {
            chunks: &self.chunks,
        })?;
        persist::write_temp(path, &bytes)
    }

    /// Load a corpus previously written by [`CorpusStore::persist`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file: CorpusFile =
            serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Some((i, chunk)) = file
            .chunks
            .iter()
            .enumerate()
            .find(|(i, chunk)| chunk.position != *i)
        {
            return Err(Error::Corrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "chunk at index {i} claims position {}",
                    chunk.position
                ),
            });
        }

        Ok(Self {
            chunks: file.chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_positions() {
        let mut corpus = CorpusStore::new();
        assert!(corpus.is_empty());

        let first = corpus.append(vec!["a".into(), "b".into()], "one.pdf");
        let second = corpus.append(vec!["c".into()], "two.pdf");

        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, vec![2]);
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.get(2).unwrap().source_document, "two.pdf");
        assert_eq!(
            corpus.all().iter().map(|c| c.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn get_missing_position_is_not_found() {
        let corpus = CorpusStore::new();
        assert!(matches!(
            corpus.get(0),
            Err(Error::NotFound { kind: "chunk", .. })
        ));
    }

    #[test]
    fn persist_and_load_preserves_text_and_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.json");

        let mut corpus = CorpusStore::new();
        let texts = vec![
            "plain ascii".to_string(),
            "quotes \" and \\ backslashes\nnew line".to_string(),
            "日本語 🎉 café".to_string(),
            "  leading and trailing whitespace  ".to_string(),
        ];
        corpus.append(texts.clone(), "doc.pdf");
        corpus.persist(&path).unwrap();

        let loaded = CorpusStore::load(&path).unwrap();
        assert_eq!(loaded.len(), texts.len());
        for (i, text) in texts.iter().enumerate() {
            let chunk = loaded.get(i).unwrap();
            assert_eq!(chunk.position, i);
            assert_eq!(chunk.text.as_bytes(), text.as_bytes());
        }
        assert!(!tmp.path().join("corpus.json.tmp").exists());
    }

    #[test]
    fn persist_replaces_previous_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.json");

        let mut corpus = CorpusStore::new();
        corpus.append(vec!["a".into()], "doc");
        corpus.persist(&path).unwrap();
        corpus.append(vec!["b".into()], "doc");
        corpus.persist(&path).unwrap();

        assert_eq!(CorpusStore::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn load_rejects_out_of_order_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.json");
        std::fs::write(
            &path,
            r#"{"chunks":[{"position":1,"text":"a","source_document":"d"}]}"#,
        )
        .unwrap();

        assert!(matches!(
            CorpusStore::load(&path),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn load_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corpus.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            CorpusStore::load(&path),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn truncate_undoes_append() {
        let mut corpus = CorpusStore::new();
        corpus.append(vec!["a".into()], "doc");
        corpus.append(vec!["b".into(), "c".into()], "doc");
        corpus.truncate(1);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.append(vec!["d".into()], "doc"), vec![1]);
    }
}
