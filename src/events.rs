//! Events emitted by the engine for the embedding UI.
//!
//! This is intentionally lightweight so components can emit events without
//! blocking the conversation loop; slow subscribers lag and drop, they
//! never stall the engine.

use crate::session::messages::Turn;

/// Events that describe what the engine is doing "right now".
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A turn was appended to the session log.
    TurnAdded {
        /// Position in the append-only log.
        index: usize,
        turn: Turn,
    },
    /// An in-progress assistant turn grew by a streamed chunk.
    TurnUpdated {
        index: usize,
        /// Full accumulated text so far, not just the new chunk.
        text: String,
    },
    /// A streaming turn reached its final text and will not change again.
    TurnFinalized { index: usize },
    /// Whether continuous capture is actively listening.
    Listening { active: bool },
    /// Interim transcript while the user is still speaking.
    Hearing { text: String },
    /// Whether synthesized speech is currently playing.
    Speaking { active: bool },
    /// A voice command resolved to a navigation target; the embedding
    /// router performs the actual transition.
    Navigate { target: String },
    /// Voice input/output mode flags changed.
    ModeChanged {
        voice_input: bool,
        voice_output: bool,
    },
    /// Out-of-band user-facing notice (microphone permission, missing device).
    Alert { message: String },
}
