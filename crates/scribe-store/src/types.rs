use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use scribe_core::types::{FailurePolicy, ServerId, UserId};

/// Per-server settings row. Created by setup, read on every ingest and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_id: ServerId,
    pub on_failure: FailurePolicy,
    /// `None` means use the global default embedding model.
    pub embedding_model: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(format!("unknown turn role: {}", other)),
        }
    }
}

/// One conversation turn, appended after every user request and bot reply.
///
/// `server_id` is the literal `"0"` for direct-message context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: UserId,
    pub server_id: ServerId,
    pub role: TurnRole,
    pub content: String,
    pub created_at: String,
    pub session_tag: Option<String>,
}

impl ConversationTurn {
    pub fn now(
        user_id: UserId,
        server_id: ServerId,
        role: TurnRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            server_id,
            role,
            content: content.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            session_tag: None,
        }
    }
}
