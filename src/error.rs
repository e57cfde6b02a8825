use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no text could be extracted from '{source_document}'")]
    EmptyExtraction { source_document: String },

    #[error("could not extract text from '{source_document}': {reason}")]
    Extraction {
        source_document: String,
        reason: String,
    },

    #[error("upstream {service} failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("upstream {service} timed out after {seconds}s")]
    UpstreamTimeout { service: &'static str, seconds: u64 },

    #[error(
        "index misalignment: corpus has {corpus} chunks but vector index has {vectors} vectors"
    )]
    IndexMisalignment { corpus: usize, vectors: usize },

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn upstream(
        service: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Upstream {
            service,
            message: message.to_string(),
        }
    }
}
