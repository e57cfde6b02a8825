use std::{path::PathBuf, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    assistant::{AssistantConfig, DEFAULT_TOP_K},
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config::{DEFAULT_BIND, DEFAULT_UPSTREAM_TIMEOUT_SECS, Settings},
    llm::openai::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL},
    vector_index::DEFAULT_DIMENSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "docchat",
    about = "Ask questions about your documents with hybrid retrieval"
)]
pub struct Cli {
    /// Override the XDG data directory (also DOCCHAT_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Extract, chunk, embed and store a document
    Ingest(IngestArgs),
    /// Ask one question against the stored documents
    Ask(AskArgs),
    /// Show corpus size and index readiness
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Upstream service --

#[derive(Debug, Args)]
pub struct UpstreamArgs {
    /// API key for the embedding and chat endpoints
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "DOCCHAT_OPENAI_BASE", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    /// Embedding model name
    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Chat model name
    #[arg(long, global = true, env = "DOCCHAT_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Length of the embedding vectors
    #[arg(long, global = true, env = "DOCCHAT_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_DIMENSION)]
    pub embedding_dimensions: usize,

    /// Seconds to wait for an upstream response (and between streamed tokens)
    #[arg(long, global = true, env = "DOCCHAT_UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS)]
    pub upstream_timeout_secs: u64,
}

// -- Chunking and retrieval --

#[derive(Debug, Args)]
pub struct RetrievalArgs {
    /// Characters per chunk
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Hits taken from each index per question
    #[arg(long, global = true, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Reject vector hits with a squared distance above this value
    #[arg(long, global = true)]
    pub max_distance: Option<f32>,
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "DOCCHAT_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// PDF or text file to ingest
    pub file: PathBuf,

    /// Name recorded as the chunks' source (defaults to the file name)
    #[arg(long)]
    pub source: Option<String>,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub question: String,

    /// Print the raw frames as NDJSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docchat",
            &mut std::io::stdout(),
        );
    }
}

impl Cli {
    /// Collect the global flags into [`Settings`].
    pub fn settings(&self) -> Settings {
        Settings {
            data_dir: self.data_dir.clone(),
            openai_api_key: self.upstream.openai_api_key.clone(),
            openai_base_url: self.upstream.openai_base_url.clone(),
            embedding_model: self.upstream.embedding_model.clone(),
            chat_model: self.upstream.chat_model.clone(),
            embedding_dimensions: self.upstream.embedding_dimensions,
            upstream_timeout: Duration::from_secs(
                self.upstream.upstream_timeout_secs,
            ),
            assistant: AssistantConfig {
                chunking: ChunkingConfig {
                    chunk_size: self.retrieval.chunk_size,
                    overlap: self.retrieval.chunk_overlap,
                },
                top_k: self.retrieval.top_k,
                max_distance: self.retrieval.max_distance,
            },
        }
    }
}
