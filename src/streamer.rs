//! Turns an answer plan into an ordered stream of [`ResponseFrame`]s.
//!
//! Every stream starts with exactly one `Meta` frame. Generator output
//! follows as `Token` frames until the generator finishes or fails, the
//! cancellation token fires, or the receiver goes away. The generator
//! stream is opened before any frame is sent.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    conversation::{ConversationTurn, Intent, ResponseFrame},
    error::Result,
    llm::{ChatMessage, GenerationRequest, Generator, TokenStream},
};

/// Sent instead of a generated answer when retrieval finds nothing.
pub const NOT_FOUND_MESSAGE: &str =
    "I could not find any relevant information in the uploaded documents.";

/// Frames buffered between the generator task and the consumer.
pub const FRAME_BUFFER: usize = 32;

const RAG_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the \
user's question strictly based on the provided context. If the answer is \
not in the context, say 'I don't know'. The context might be messy text \
extracted from a PDF; do your best to clean it up.";

const CHAT_SYSTEM_PROMPT: &str = "You are a friendly assistant for a \
document question-answering service. Reply conversationally and briefly.";

/// What the streamer should answer and from which inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerPlan {
    /// Answer from retrieved context only.
    Rag {
        question: String,
        standalone_question: String,
        context: Vec<String>,
    },
    /// Plain conversation, no retrieval.
    Chat {
        history: Vec<ConversationTurn>,
        question: String,
    },
}

impl AnswerPlan {
    pub fn intent(&self) -> Intent {
        match self {
            AnswerPlan::Rag { .. } => Intent::Search,
            AnswerPlan::Chat { .. } => Intent::Chat,
        }
    }

    /// The leading frame for this plan.
    pub fn meta(&self) -> ResponseFrame {
        match self {
            AnswerPlan::Rag {
                standalone_question,
                context,
                ..
            } => ResponseFrame::Meta {
                intent: Intent::Search,
                standalone_question: Some(standalone_question.clone()),
                sources: context.clone(),
            },
            AnswerPlan::Chat { .. } => ResponseFrame::Meta {
                intent: Intent::Chat,
                standalone_question: None,
                sources: Vec::new(),
            },
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { fragments: usize },
    /// Retrieval was empty; the fixed message was sent instead.
    NotFound,
    Cancelled,
    /// The receiver was dropped.
    Disconnected,
    /// The generator failed after the meta frame was sent.
    Failed,
}

/// Where the frames after `Meta` come from.
enum Body {
    NotFound,
    Tokens(TokenStream),
}

/// A plan whose generator stream, if it needs one, is already open.
pub struct OpenAnswer {
    meta: ResponseFrame,
    body: Body,
}

impl OpenAnswer {
    pub fn meta(&self) -> &ResponseFrame {
        &self.meta
    }
}

impl std::fmt::Debug for OpenAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAnswer")
            .field("meta", &self.meta)
            .field("not_found", &matches!(self.body, Body::NotFound))
            .finish()
    }
}

#[derive(Clone)]
pub struct AnswerStreamer {
    generator: Arc<dyn Generator>,
}

impl AnswerStreamer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Open the answer for `plan` and pump its frames on a background
    /// task.
    ///
    /// The generator stream is opened before this returns, so a refused
    /// or timed-out request is an `Err` here rather than a stream holding
    /// only the `Meta` frame. Cancelling before the stream opens yields a
    /// receiver that closes without frames.
    pub async fn start(
        &self,
        plan: AnswerPlan,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ResponseFrame>> {
        match self.open(plan, &cancel).await? {
            Some(answer) => Ok(self.spawn(answer, cancel)),
            None => {
                let (_, rx) = mpsc::channel(1);
                Ok(rx)
            }
        }
    }

    /// Build the request for `plan` and open the generator stream.
    ///
    /// Empty retrieval needs no generator call. Returns `None` when
    /// `cancel` fires first.
    pub async fn open(
        &self,
        plan: AnswerPlan,
        cancel: &CancellationToken,
    ) -> Result<Option<OpenAnswer>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let meta = plan.meta();
        let request = match plan {
            AnswerPlan::Rag { context, .. } if context.is_empty() => {
                info!("no relevant chunks, sending not-found answer");
                return Ok(Some(OpenAnswer {
                    meta,
                    body: Body::NotFound,
                }));
            }
            AnswerPlan::Rag {
                question, context, ..
            } => rag_request(&context, &question),
            AnswerPlan::Chat { history, question } => {
                chat_request(&history, &question)
            }
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            opened = self.generator.stream(request) => opened,
        };
        let tokens = opened.inspect_err(|e| {
            warn!(error = %e, "could not start answer stream");
        })?;

        Ok(Some(OpenAnswer {
            meta,
            body: Body::Tokens(tokens),
        }))
    }

    /// Run `answer` on a background task and hand back the frame
    /// receiver.
    ///
    /// Dropping the receiver or cancelling `cancel` stops the task before
    /// it pulls the next fragment from the generator.
    pub fn spawn(
        &self,
        answer: OpenAnswer,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ResponseFrame> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(async move {
            let outcome = run(answer, tx, cancel).await;
            debug!(?outcome, "answer stream finished");
        });
        rx
    }
}

/// Send the `Meta` frame, then the body of `answer`, into `tx`.
pub async fn run(
    answer: OpenAnswer,
    tx: mpsc::Sender<ResponseFrame>,
    cancel: CancellationToken,
) -> StreamOutcome {
    if let Err(outcome) = emit(&tx, answer.meta, &cancel).await {
        return outcome;
    }

    let mut tokens = match answer.body {
        Body::NotFound => {
            let frame = ResponseFrame::token(NOT_FOUND_MESSAGE);
            return match emit(&tx, frame, &cancel).await {
                Ok(()) => StreamOutcome::NotFound,
                Err(outcome) => outcome,
            };
        }
        Body::Tokens(tokens) => tokens,
    };

    let mut fragments = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            _ = tx.closed() => return StreamOutcome::Disconnected,
            next = tokens.next() => next,
        };

        match next {
            None => return StreamOutcome::Completed { fragments },
            Some(Ok(fragment)) if fragment.is_empty() => continue,
            Some(Ok(fragment)) => {
                let frame = ResponseFrame::token(fragment);
                if let Err(outcome) = emit(&tx, frame, &cancel).await {
                    return outcome;
                }
                fragments += 1;
            }
            Some(Err(e)) => {
                warn!(error = %e, fragments, "answer stream broke off");
                return StreamOutcome::Failed;
            }
        }
    }
}

impl std::fmt::Debug for AnswerStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStreamer").finish_non_exhaustive()
    }
}

async fn emit(
    tx: &mpsc::Sender<ResponseFrame>,
    frame: ResponseFrame,
    cancel: &CancellationToken,
) -> std::result::Result<(), StreamOutcome> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamOutcome::Cancelled),
        sent = tx.send(frame) => {
            sent.map_err(|_| StreamOutcome::Disconnected)
        }
    }
}

/// System instructions plus one message holding context and question.
pub fn rag_request(context: &[String], question: &str) -> GenerationRequest {
    let context = context.join("\n\n");
    GenerationRequest::new(vec![
        ChatMessage::system(RAG_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{context}\n\nQuestion: {question}"
        )),
    ])
}

/// Generic assistant instructions, the full history, then the question.
pub fn chat_request(
    history: &[ConversationTurn],
    question: &str,
) -> GenerationRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CHAT_SYSTEM_PROMPT));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(question));
    GenerationRequest::new(messages)
}
