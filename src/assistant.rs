//! Ingestion and question answering wired end to end.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    chunking::ChunkingConfig,
    conversation::{ConversationTurn, Intent, ResponseFrame},
    error::{Error, Result},
    llm::{Embedder, Generator},
    retriever::{HybridRetriever, RetrievalResult},
    rewriter::QueryRewriter,
    router::ConversationRouter,
    store::{KnowledgeStore, StoreStats},
    streamer::{AnswerPlan, AnswerStreamer},
};

/// Default number of hits requested from each index.
pub const DEFAULT_TOP_K: usize = 3;

/// Tunables for ingestion and retrieval.
#[derive(Debug, Clone, Copy)]
pub struct AssistantConfig {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub max_distance: Option<f32>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            max_distance: None,
        }
    }
}

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub chunks_added: usize,
    #[serde(skip)]
    pub positions: Vec<usize>,
}

/// Owns the knowledge store and the collaborators around it.
pub struct Assistant {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    router: ConversationRouter,
    rewriter: QueryRewriter,
    streamer: AnswerStreamer,
    retriever: HybridRetriever,
    config: AssistantConfig,
}

impl Assistant {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: AssistantConfig,
    ) -> Result<Self> {
        config.chunking.validate()?;
        if config.top_k == 0 {
            return Err(Error::InvalidConfiguration(
                "top_k must be at least 1".into(),
            ));
        }

        Ok(Self {
            store,
            embedder,
            router: ConversationRouter::new(Arc::clone(&generator)),
            rewriter: QueryRewriter::new(Arc::clone(&generator)),
            streamer: AnswerStreamer::new(generator),
            retriever: HybridRetriever::new(config.max_distance),
            config,
        })
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Chunk, embed and store one document's text.
    ///
    /// Every chunk is embedded before the store is touched. If any
    /// embedding fails, nothing is written.
    pub async fn ingest(
        &self,
        source_document: &str,
        text: &str,
    ) -> Result<IngestReport> {
        let chunks = self.config.chunking.split(text)?;
        if chunks.is_empty() || text.trim().is_empty() {
            return Err(Error::EmptyExtraction {
                source_document: source_document.to_string(),
            });
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            embeddings.push(self.embedder.embed(chunk).await?);
            debug!(source_document, chunk = i, "embedded chunk");
        }

        let store = Arc::clone(&self.store);
        let source = source_document.to_string();
        let positions = tokio::task::spawn_blocking(move || {
            store.append(&source, chunks, embeddings)
        })
        .await??;

        Ok(IngestReport {
            chunks_added: positions.len(),
            positions,
        })
    }

    /// Answer `question`, returning the frame stream.
    ///
    /// Routing, rewriting, retrieval and opening the generator stream
    /// happen before this returns, so their failures surface here. A
    /// failure after the first fragment ends the stream early instead.
    pub async fn ask(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ResponseFrame>> {
        let plan = self.plan(question, history).await?;
        self.streamer.start(plan, cancel).await
    }

    /// Decide how to answer and gather any context needed.
    pub async fn plan(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<AnswerPlan> {
        let intent = self.router.classify(history, question).await;
        info!(%intent, history = history.len(), "handling question");

        if intent == Intent::Chat {
            return Ok(AnswerPlan::Chat {
                history: history.to_vec(),
                question: question.to_string(),
            });
        }

        let standalone = self.rewriter.rewrite(history, question).await?;
        let retrieval = self.retrieve(&standalone).await?;
        Ok(AnswerPlan::Rag {
            question: question.to_string(),
            standalone_question: standalone,
            context: retrieval.texts(),
        })
    }

    /// Hybrid retrieval for a standalone query.
    ///
    /// An empty store returns an empty result without embedding the query.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        if self.stats().await?.total_chunks == 0 {
            debug!("store is empty, skipping retrieval");
            return Ok(RetrievalResult::default());
        }

        let vector = self.embedder.embed(query).await?;
        let store = Arc::clone(&self.store);
        let retriever = self.retriever;
        let query = query.to_string();
        let k = self.config.top_k;

        let result = tokio::task::spawn_blocking(move || {
            store.read(|indexes| {
                retriever.retrieve(indexes, &query, &vector, k)
            })
        })
        .await???;

        debug!(hits = result.len(), "retrieved context");
        Ok(result)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.stats()).await?
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_dir::ArtifactPaths,
        test_support::{HashEmbedder, ScriptedGenerator},
    };

    const DIM: usize = 64;

    fn store(dir: &tempfile::TempDir) -> Arc<KnowledgeStore> {
        Arc::new(
            KnowledgeStore::open_artifacts(
                ArtifactPaths::in_dir(dir.path()),
                DIM,
            )
            .unwrap(),
        )
    }

    fn small_chunks() -> AssistantConfig {
        AssistantConfig {
            chunking: ChunkingConfig {
                chunk_size: 40,
                overlap: 0,
            },
            ..AssistantConfig::default()
        }
    }

    fn assistant(
        store: Arc<KnowledgeStore>,
        embedder: Arc<HashEmbedder>,
        generator: Arc<ScriptedGenerator>,
    ) -> Assistant {
        Assistant::new(store, embedder, generator, small_chunks()).unwrap()
    }

    #[tokio::test]
    async fn ingest_reports_chunks_and_updates_stats() {
        let dir = tempfile::tempdir().unwrap();
        let a = assistant(
            store(&dir),
            Arc::new(HashEmbedder::new(DIM)),
            Arc::new(ScriptedGenerator::new()),
        );

        let report = a.ingest("doc.txt", &"x".repeat(100)).await.unwrap();

        assert_eq!(report.chunks_added, 3);
        assert_eq!(report.positions, vec![0, 1, 2]);
        let stats = a.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert!(stats.lexical_index_ready);
    }

    #[tokio::test]
    async fn blank_document_is_empty_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let a = assistant(
            store(&dir),
            embedder.clone(),
            Arc::new(ScriptedGenerator::new()),
        );

        let err = a.ingest("blank.pdf", "").await.unwrap_err();
        assert!(matches!(err, Error::EmptyExtraction { .. }));

        let err = a.ingest("spaces.txt", " \n\t ").await.unwrap_err();
        assert!(matches!(err, Error::EmptyExtraction { .. }));
        assert_eq!(embedder.calls(), 0);
        assert!(!dir.path().join("corpus.json").exists());
    }

    #[tokio::test]
    async fn failed_embedding_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let a = assistant(
            store(&dir),
            Arc::new(HashEmbedder::failing_after(DIM, 1)),
            Arc::new(ScriptedGenerator::new()),
        );

        let err = a.ingest("doc.txt", &"y".repeat(100)).await.unwrap_err();

        assert!(matches!(err, Error::Upstream { .. }));
        assert_eq!(a.stats().await.unwrap().total_chunks, 0);
        assert!(!dir.path().join("vectors.bin").exists());
    }

    #[tokio::test]
    async fn wrong_embedding_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = assistant(
            store(&dir),
            Arc::new(HashEmbedder::new(DIM + 1)),
            Arc::new(ScriptedGenerator::new()),
        );

        let err = a.ingest("doc.txt", "some text").await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(a.stats().await.unwrap().total_chunks, 0);
    }

    #[tokio::test]
    async fn search_plan_uses_standalone_question_for_retrieval() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completions(&["search", "pricing of the pro plan"]),
        );
        let a = assistant(
            store(&dir),
            Arc::new(HashEmbedder::new(DIM)),
            generator.clone(),
        );
        a.ingest("doc.txt", "the pro plan pricing is ten dollars")
            .await
            .unwrap();

        let history = vec![ConversationTurn::user("tell me about pro")];
        let plan = a.plan("how much?", &history).await.unwrap();

        match plan {
            AnswerPlan::Rag {
                question,
                standalone_question,
                context,
            } => {
                assert_eq!(question, "how much?");
                assert_eq!(standalone_question, "pricing of the pro plan");
                assert_eq!(context, vec!["the pro plan pricing is ten dollars"]);
            }
            other => panic!("expected rag plan, got {other:?}"),
        }
        assert_eq!(generator.complete_calls(), 2);
    }

    #[tokio::test]
    async fn empty_store_skips_query_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let a = assistant(
            store(&dir),
            embedder.clone(),
            Arc::new(ScriptedGenerator::new()),
        );

        assert!(a.retrieve("anything").await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn ask_streams_meta_then_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completions(&["search"])
                .with_stream(&["Ten ", "dollars."]),
        );
        let a = assistant(
            store(&dir),
            Arc::new(HashEmbedder::new(DIM)),
            generator.clone(),
        );
        a.ingest("doc.txt", "pro plan costs ten dollars")
            .await
            .unwrap();

        let mut rx = a
            .ask("pro plan cost", &[], CancellationToken::new())
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert!(frames[0].is_meta());
        assert_eq!(&frames[1..], &[
            ResponseFrame::token("Ten "),
            ResponseFrame::token("dollars."),
        ]);
    }

    #[test]
    fn zero_top_k_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = Assistant::new(
            store(&dir),
            Arc::new(HashEmbedder::new(DIM)),
            Arc::new(ScriptedGenerator::new()),
            AssistantConfig {
                top_k: 0,
                ..AssistantConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }
}
