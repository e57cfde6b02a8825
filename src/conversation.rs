//! Request-scoped conversation types and the frames streamed back to callers.

use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a conversation, as sent by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Whether a question needs document lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    Search,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Search => "search",
        }
    }

    /// Parse a classifier label after trimming and lowercasing it.
    ///
    /// # Examples
    ///
    /// ```
    /// use docchat::conversation::Intent;
    ///
    /// assert_eq!(Intent::from_label("  Search\n"), Some(Intent::Search));
    /// assert_eq!(Intent::from_label("chat"), Some(Intent::Chat));
    /// assert_eq!(Intent::from_label("chat."), None);
    /// ```
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "chat" => Some(Intent::Chat),
            "search" => Some(Intent::Search),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of a streamed answer.
///
/// Serialized with a `type` tag so each frame is a self-contained JSON
/// object: `{"type":"meta",...}` or `{"type":"token","content":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseFrame {
    Meta {
        intent: Intent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        standalone_question: Option<String>,
        sources: Vec<String>,
    },
    Token {
        content: String,
    },
}

impl ResponseFrame {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, ResponseFrame::Meta { .. })
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
