//! Client for OpenAI-compatible embedding and chat-completion endpoints.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{
    Client,
    Response,
    StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChatMessage,
    Embedder,
    GenerationRequest,
    Generator,
    TokenStream,
};
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    /// Requested embedding length; `None` uses the model's native size.
    pub dimensions: Option<usize>,
}

/// Talks to `/embeddings` and `/chat/completions` on one base URL.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    dimensions: Option<usize>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "missing OpenAI API key".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                Error::InvalidConfiguration("invalid OpenAI API key".into())
            })?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model,
            chat_model: config.chat_model,
            dimensions: config.dimensions,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// POST `body`, retrying rate limits and server errors with backoff.
    async fn post<B: Serialize + Sync>(
        &self,
        service: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        let url = self.endpoint(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.client.post(&url).json(body).send().await;
            match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".into());
                    if should_retry(status) && attempt < MAX_ATTEMPTS {
                        warn!(%status, attempt, service, "retrying request");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(Error::upstream(
                        service,
                        format!("{status}: {}", text.trim()),
                    ));
                }
                Err(err) => {
                    if err.is_connect() && attempt < MAX_ATTEMPTS {
                        warn!(error = %err, attempt, service, "retrying request");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(Error::upstream(service, err));
                }
            }
        }
    }

    async fn chat(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<Response> {
        let body = ChatRequest {
            model: &self.chat_model,
            messages: &request.messages,
            temperature: request.temperature,
            stream,
        };
        debug!(
            model = %self.chat_model,
            messages = request.messages.len(),
            stream,
            "chat completion request"
        );
        self.post("generator", "chat/completions", &body).await
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .finish_non_exhaustive()
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(5)))
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: [text],
            dimensions: self.dimensions,
        };
        let parsed: EmbeddingResponse = self
            .post("embedder", "embeddings", &body)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream("embedder", e))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| {
                Error::upstream("embedder", "response contained no embedding")
            })
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    async fn complete(&self, request: GenerationRequest) -> Result<String> {
        let parsed: ChatResponse = self
            .chat(&request, false)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream("generator", e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                Error::upstream("generator", "response contained no message")
            })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream> {
        let response = self.chat(&request, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_tokens(bytes))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// One parsed line of a server-sent event stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        Error::upstream("generator", format!("malformed stream event: {e}"))
    })?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Token(content))
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    /// Parse every complete line in the buffer, queueing its tokens.
    fn drain_lines(&mut self) -> Result<()> {
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.handle_line(&String::from_utf8_lossy(&line))?;
            if self.done {
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        match parse_sse_line(line)? {
            SseLine::Token(token) => self.pending.push_back(token),
            SseLine::Done => self.done = true,
            SseLine::Skip => {}
        }
        Ok(())
    }
}

/// Turn a raw event-stream body into content fragments.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode intact.
fn sse_tokens(
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
) -> TokenStream {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::try_unfold(state, next_token).boxed()
}

async fn next_token(
    mut state: SseState,
) -> Result<Option<(String, SseState)>> {
    loop {
        if let Some(token) = state.pending.pop_front() {
            return Ok(Some((token, state)));
        }
        if state.done {
            return Ok(None);
        }
        match state.bytes.next().await {
            Some(chunk) => {
                let chunk = chunk.map_err(|e| Error::upstream("generator", e))?;
                state.buffer.extend_from_slice(&chunk);
                state.drain_lines()?;
            }
            None => {
                let rest = std::mem::take(&mut state.buffer);
                state.handle_line(&String::from_utf8_lossy(&rest))?;
                state.done = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&[u8]]) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        let parts: Vec<reqwest::Result<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.to_vec())).collect();
        stream::iter(parts).boxed()
    }

    async fn collect(stream: TokenStream) -> Vec<String> {
        stream.map(|t| t.unwrap()).collect().await
    }

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Token("Hel".into()));
    }

    #[test]
    fn role_only_delta_and_comments_are_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
    }

    #[test]
    fn done_marker_ends_stream() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
    }

    #[test]
    fn malformed_event_is_upstream_error() {
        let err = parse_sse_line("data: {not json").unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn tokens_survive_chunk_boundaries() {
        let stream = sse_tokens(body(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\nda",
            b"ta: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            b"data: [DONE]\n\n",
        ]));
        assert_eq!(collect(stream).await, vec!["He", "llo"]);
    }

    #[tokio::test]
    async fn split_multibyte_character_decodes_intact() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\n";
        let bytes = event.as_bytes();
        let split = event.find('é').unwrap() + 1;
        let stream = sse_tokens(body(&[&bytes[..split], &bytes[split..]]));
        assert_eq!(collect(stream).await, vec!["é"]);
    }

    #[tokio::test]
    async fn nothing_after_done_is_read() {
        let stream = sse_tokens(body(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            b"data: [DONE]\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ]));
        assert_eq!(collect(stream).await, vec!["a"]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let stream = sse_tokens(body(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        ]));
        assert_eq!(collect(stream).await, vec!["tail"]);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = OpenAiClient::new(OpenAiConfig {
            api_key: "  ".into(),
            base_url: DEFAULT_BASE_URL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            dimensions: None,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::new(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url: "http://localhost:9/v1/".into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            dimensions: Some(256),
        })
        .unwrap();
        assert_eq!(
            client.endpoint("embeddings"),
            "http://localhost:9/v1/embeddings"
        );
    }
}
