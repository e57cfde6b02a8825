//! docchat - ask questions about your documents.
//!
//! Documents are split into overlapping character windows, embedded, and
//! kept in three position-aligned structures: the chunk corpus, a flat
//! vector index, and a BM25 index built with
//! [Tantivy](https://github.com/quickwit-oss/tantivy). Questions are routed
//! to plain chat or to retrieval; retrieved chunks are fed to a chat model
//! whose answer streams back as NDJSON frames.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docchat::{
//!     Assistant,
//!     AssistantConfig,
//!     DataDir,
//!     KnowledgeStore,
//!     llm::openai::{OpenAiClient, OpenAiConfig},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> docchat::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let store = Arc::new(KnowledgeStore::open(&data_dir, 1536)?);
//! let client = Arc::new(OpenAiClient::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
//!     base_url: "https://api.openai.com/v1".into(),
//!     embedding_model: "text-embedding-3-small".into(),
//!     chat_model: "gpt-4o-mini".into(),
//!     dimensions: None,
//! })?);
//! let assistant = Assistant::new(
//!     store,
//!     client.clone(),
//!     client,
//!     AssistantConfig::default(),
//! )?;
//!
//! assistant.ingest("notes.txt", "Rust was first released in 2015.").await?;
//! let mut frames = assistant
//!     .ask("When was Rust released?", &[], CancellationToken::new())
//!     .await?;
//! while let Some(frame) = frames.recv().await {
//!     print!("{}", frame.to_ndjson()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod corpus;
pub mod data_dir;
pub mod error;
pub mod extract;
pub mod lexical_index;
pub mod llm;
mod persist;
pub mod retriever;
pub mod rewriter;
pub mod router;
pub mod server;
pub mod store;
pub mod streamer;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vector_index;

pub use assistant::{Assistant, AssistantConfig, IngestReport};
pub use config::Settings;
pub use conversation::{ConversationTurn, Intent, ResponseFrame, Role};
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use retriever::{HybridRetriever, RetrievalResult};
pub use store::KnowledgeStore;
