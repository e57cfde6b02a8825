#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use docchat::{
    Assistant,
    AssistantConfig,
    KnowledgeStore,
    ResponseFrame,
    data_dir::ArtifactPaths,
    error::Result,
};
pub use docchat::test_support::{HashEmbedder, ScriptedGenerator};
use tokio::sync::mpsc;

pub const DIM: usize = 64;

pub fn embedder() -> Arc<HashEmbedder> {
    Arc::new(HashEmbedder::new(DIM))
}

/// Router and rewriter replies first, then the answer fragments.
pub fn generator(
    completions: &[&str],
    fragments: &[&str],
) -> Arc<ScriptedGenerator> {
    Arc::new(
        ScriptedGenerator::new()
            .with_completions(completions)
            .with_stream(fragments),
    )
}

pub fn open_store(dir: &Path) -> Result<KnowledgeStore> {
    KnowledgeStore::open_artifacts(ArtifactPaths::in_dir(dir), DIM)
}

pub fn assistant(
    dir: &Path,
    embedder: Arc<HashEmbedder>,
    generator: Arc<ScriptedGenerator>,
    config: AssistantConfig,
) -> Result<Assistant> {
    Assistant::new(Arc::new(open_store(dir)?), embedder, generator, config)
}

pub async fn collect(
    mut rx: mpsc::Receiver<ResponseFrame>,
) -> Vec<ResponseFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}
