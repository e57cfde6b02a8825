//! HTTP surface: document upload and ingestion, streamed answers, health.

use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    Json,
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

use crate::{
    assistant::{Assistant, IngestReport},
    conversation::{ConversationTurn, ResponseFrame},
    error::{Error, Result},
    extract::{self, DocumentKind},
    store::StoreStats,
};

/// Largest accepted request body, uploads included.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default, alias = "messages")]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the application router around a shared assistant.
pub fn router(assistant: Arc<Assistant>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ingest", post(ingest))
        .route("/upload", post(upload))
        .route("/ask", post(ask))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(assistant)
}

/// Listen on `addr` until Ctrl-C.
pub async fn serve(assistant: Arc<Assistant>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "docchat listening");

    axum::serve(listener, router(assistant))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "running",
        service: "docchat",
    })
}

async fn stats(
    State(assistant): State<Arc<Assistant>>,
) -> Result<Json<StoreStats>> {
    Ok(Json(assistant.stats().await?))
}

async fn ingest(
    State(assistant): State<Arc<Assistant>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestReport>> {
    info!(source = %request.source, chars = request.text.len(), "ingest request");
    Ok(Json(assistant.ingest(&request.source, &request.text).await?))
}

async fn upload(
    State(assistant): State<Arc<Assistant>>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidRequest(e.body_text()))?;

        let kind = DocumentKind::detect(
            Some(&file_name),
            content_type.as_deref(),
            &bytes,
        );
        info!(file = %file_name, ?kind, bytes = bytes.len(), "upload received");

        let text = extract::extract_text_blocking(
            file_name.clone(),
            kind,
            bytes.to_vec(),
        )
        .await?;
        return Ok(Json(assistant.ingest(&file_name, &text).await?));
    }

    Err(Error::InvalidRequest("missing multipart field 'file'".into()))
}

async fn ask(
    State(assistant): State<Arc<Assistant>>,
    Json(request): Json<AskRequest>,
) -> Result<Response> {
    if request.question.trim().is_empty() {
        return Err(Error::InvalidRequest("question is empty".into()));
    }

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let frames = assistant
        .ask(&request.question, &request.history, cancel)
        .await?;

    let lines = CancelOnDrop {
        inner: ReceiverStream::new(frames),
        _guard: guard,
    }
    .map(|frame: ResponseFrame| frame.to_ndjson());

    Ok((
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response())
}

/// Cancels the answer task once the response body is dropped, which
/// happens when the client disconnects.
struct CancelOnDrop<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidConfiguration(_) | Error::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::EmptyExtraction { .. } | Error::Extraction { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        } else {
            warn!(%status, error = %self, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
