use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    conversation::{ConversationTurn, Intent},
    error::Result,
    llm::{ChatMessage, GenerationRequest, Generator},
};

/// How many prior turns the classifier sees.
pub const ROUTER_HISTORY_TURNS: usize = 2;

/// Intent assumed when the classifier cannot be trusted. Skipping a
/// needed lookup costs more than an unneeded one.
pub const FALLBACK_INTENT: Intent = Intent::Search;

const ROUTER_PROMPT: &str = "You route questions for a document assistant. \
Decide whether the latest user message needs a lookup in the uploaded \
documents or is plain conversation (greetings, thanks, small talk, \
questions about the assistant itself). Reply with exactly one word: \
\"search\" or \"chat\".";

/// Raw classifier verdict before any fallback is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Intent(Intent),
    /// The classifier answered with something other than a known label.
    Ambiguous(String),
}

/// Decides whether a question needs retrieval.
#[derive(Clone)]
pub struct ConversationRouter {
    generator: Arc<dyn Generator>,
}

impl ConversationRouter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Classify with the fallback applied: ambiguous output and upstream
    /// failures both resolve to [`FALLBACK_INTENT`].
    pub async fn classify(
        &self,
        history: &[ConversationTurn],
        question: &str,
    ) -> Intent {
        match self.classify_raw(history, question).await {
            Ok(Classification::Intent(intent)) => {
                debug!(%intent, "routed question");
                intent
            }
            Ok(Classification::Ambiguous(raw)) => {
                warn!(
                    output = %raw,
                    fallback = %FALLBACK_INTENT,
                    "ambiguous intent"
                );
                FALLBACK_INTENT
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %FALLBACK_INTENT,
                    "intent classification failed"
                );
                FALLBACK_INTENT
            }
        }
    }

    /// Ask the generator for a label and report exactly what came back.
    pub async fn classify_raw(
        &self,
        history: &[ConversationTurn],
        question: &str,
    ) -> Result<Classification> {
        let raw = self
            .generator
            .complete(routing_request(history, question))
            .await?;
        Ok(match Intent::from_label(&raw) {
            Some(intent) => Classification::Intent(intent),
            None => Classification::Ambiguous(raw),
        })
    }
}

impl std::fmt::Debug for ConversationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRouter").finish_non_exhaustive()
    }
}

/// Build the classifier prompt from the last two turns and the question.
pub fn routing_request(
    history: &[ConversationTurn],
    question: &str,
) -> GenerationRequest {
    let recent = &history[history.len().saturating_sub(ROUTER_HISTORY_TURNS)..];

    let mut transcript = String::new();
    for turn in recent {
        transcript.push_str(turn.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&turn.content);
        transcript.push('\n');
    }

    let user = if transcript.is_empty() {
        format!("Latest message: {question}")
    } else {
        format!("Recent conversation:\n{transcript}\nLatest message: {question}")
    };

    GenerationRequest::new(vec![
        ChatMessage::system(ROUTER_PROMPT),
        ChatMessage::user(user),
    ])
    .deterministic()
}
