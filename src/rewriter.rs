use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    conversation::ConversationTurn,
    error::Result,
    llm::{ChatMessage, GenerationRequest, Generator},
};

const REWRITE_PROMPT: &str = "Given the conversation so far and a follow-up \
question, rewrite the follow-up as a standalone question that can be \
understood without the conversation. Resolve pronouns and references. \
Do NOT answer the question; reply with the rewritten question only.";

/// Turns conversational follow-ups into self-contained search queries.
#[derive(Clone)]
pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Return a standalone form of `question`.
    ///
    /// With no history the question is already standalone and is returned
    /// as-is without contacting the generator. A blank rewrite also falls
    /// back to the original question.
    pub async fn rewrite(
        &self,
        history: &[ConversationTurn],
        question: &str,
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let rewritten = self
            .generator
            .complete(rewrite_request(history, question))
            .await?;
        let rewritten = rewritten.trim();

        if rewritten.is_empty() {
            warn!("rewriter returned nothing, using original question");
            return Ok(question.to_string());
        }
        debug!(original = question, standalone = rewritten, "rewrote question");
        Ok(rewritten.to_string())
    }
}

impl std::fmt::Debug for QueryRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRewriter").finish_non_exhaustive()
    }
}

fn rewrite_request(
    history: &[ConversationTurn],
    question: &str,
) -> GenerationRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(REWRITE_PROMPT));
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(format!(
        "Follow-up question: {question}\nStandalone question:"
    )));
    GenerationRequest::new(messages).deterministic()
}
