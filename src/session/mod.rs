//! Session orchestration: the engine's public surface, the turn log, and
//! the event loop tying capture, intent, replies, and synthesis together.

pub mod messages;
pub mod orchestrator;

pub use messages::{Role, Turn};
pub use orchestrator::{EngineHandle, EnginePorts, VoiceEngine};
