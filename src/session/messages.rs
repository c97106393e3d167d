//! Message types owned by the session orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking or typing.
    User,
    /// The engine's reply.
    Assistant,
}

/// One entry in the ordered session log: a user message or an assistant
/// reply. Assistant turns grow in place while their reply streams and are
/// immutable once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: Role,
    /// Turn text; for a streaming assistant turn, the text so far.
    pub text: String,
    /// When the turn was created.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// A user turn stamped now.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// An assistant turn stamped now.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Requests from the embedding application, sent through the handle.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Submit a typed message (bypasses the transcript gate).
    SubmitText { text: String },
    /// Turn continuous voice capture on or off.
    SetVoiceInput { enabled: bool },
    /// Turn spoken replies on or off.
    SetVoiceOutput { enabled: bool },
    /// Attach or clear the topic hint sent with backend queries.
    SetContextTag { tag: Option<String> },
    /// Copy of the session log right now.
    Snapshot {
        reply: oneshot::Sender<Vec<Turn>>,
    },
    /// Stop every component and exit the engine loop.
    Shutdown,
}
