//! Embedding and text-generation collaborators.
//!
//! The pipeline only sees the [`Embedder`] and [`Generator`] traits. The
//! OpenAI-compatible HTTP client in [`openai`] implements both, and
//! [`Timed`] wraps either one with a per-call deadline.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{
    conversation::{ConversationTurn, Role},
    error::{Error, Result},
};

pub mod openai;

/// Incremental text fragments of a streamed completion.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Role tag understood by chat-completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        Self {
            role,
            content: turn.content.clone(),
        }
    }
}

/// A role-tagged message sequence plus sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    /// `None` leaves the provider default in place.
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    /// Pin sampling to deterministic output.
    pub fn deterministic(mut self) -> Self {
        self.temperature = Some(0.0);
        self
    }
}

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces chat completions, whole or fragment by fragment.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: GenerationRequest) -> Result<String>;

    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream>;
}

/// Run `fut`, failing with [`Error::UpstreamTimeout`] once `limit` passes.
pub async fn with_timeout<T>(
    service: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::UpstreamTimeout {
            service,
            seconds: limit.as_secs(),
        }),
    }
}

/// Applies a deadline to every call of the wrapped collaborator.
///
/// For streamed completions the deadline covers opening the stream and
/// then each gap between fragments.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    inner: T,
    limit: Duration,
}

impl<T> Timed<T> {
    pub fn new(inner: T, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<T: Embedder> Embedder for Timed<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_timeout("embedder", self.limit, self.inner.embed(text)).await
    }
}

#[async_trait]
impl<T: Generator> Generator for Timed<T> {
    async fn complete(&self, request: GenerationRequest) -> Result<String> {
        with_timeout("generator", self.limit, self.inner.complete(request))
            .await
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream> {
        let limit = self.limit;
        let stream =
            with_timeout("generator", limit, self.inner.stream(request))
                .await?;

        let idle_limited = tokio_stream::StreamExt::timeout(stream, limit)
            .map(move |item| match item {
                Ok(fragment) => fragment,
                Err(_) => Err(Error::UpstreamTimeout {
                    service: "generator",
                    seconds: limit.as_secs(),
                }),
            });
        Ok(idle_limited.boxed())
    }
}
