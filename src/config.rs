//! Runtime settings gathered from command-line flags and the environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{
    assistant::AssistantConfig,
    error::{Error, Result},
    llm::openai::OpenAiConfig,
    vector_index::DEFAULT_DIMENSION,
};

pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Everything needed to build the store, the upstream client and the
/// assistant.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub embedding_dimensions: usize,
    pub upstream_timeout: Duration,
    pub assistant: AssistantConfig,
}

impl Settings {
    /// Reject values that would make the pipeline misbehave later.
    pub fn validate(&self) -> Result<()> {
        self.assistant.chunking.validate()?;

        if self.assistant.top_k == 0 {
            return Err(invalid("--top-k must be at least 1"));
        }
        if let Some(max) = self.assistant.max_distance
            && (!max.is_finite() || max < 0.0)
        {
            return Err(invalid(
                "--max-distance must be a finite, non-negative number",
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(invalid("--embedding-dimensions must be at least 1"));
        }
        if self.upstream_timeout.is_zero() {
            return Err(invalid("--upstream-timeout-secs must be at least 1"));
        }
        Ok(())
    }

    /// Client settings for the OpenAI-compatible endpoint.
    ///
    /// Fails when no API key was given. The `dimensions` request field is
    /// only sent when a non-default size was asked for, so servers that do
    /// not understand it keep working with the default.
    pub fn openai(&self) -> Result<OpenAiConfig> {
        let api_key = self
            .openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                invalid(
                    "an API key is required \
                     (--openai-api-key or OPENAI_API_KEY)",
                )
            })?;

        let dimensions = (self.embedding_dimensions != DEFAULT_DIMENSION)
            .then_some(self.embedding_dimensions);

        Ok(OpenAiConfig {
            api_key,
            base_url: self.openai_base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chat_model: self.chat_model.clone(),
            dimensions,
        })
    }
}

/// Parse a bind address such as `127.0.0.1:8000`.
pub fn parse_bind(bind: &str) -> Result<SocketAddr> {
    bind.parse::<SocketAddr>()
        .map_err(|e| invalid(&format!("bad bind address '{bind}': {e}")))
}

impl Default for Settings {
    fn default() -> Self {
        use crate::llm::openai::{
            DEFAULT_BASE_URL,
            DEFAULT_CHAT_MODEL,
            DEFAULT_EMBEDDING_MODEL,
        };

        Self {
            data_dir: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            embedding_dimensions: DEFAULT_DIMENSION,
            upstream_timeout: Duration::from_secs(
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
            ),
            assistant: AssistantConfig::default(),
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfiguration(message.to_string())
}
