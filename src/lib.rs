//! Kotha: continuous voice interaction engine.
//!
//! This crate turns platform speech capture and synthesis into an ongoing
//! conversation: Microphone → transcript gate → intent resolution →
//! streaming reply → speaker, with the microphone kept hot between turns.
//!
//! # Architecture
//!
//! The engine is built from independent stages connected by async channels:
//! - **Recognition manager**: keeps single-shot platform capture sessions
//!   alive continuously, classifying failures and restarting
//! - **Transcript gate**: deduplicates and serializes finalized transcripts
//! - **Intent resolver**: recognizes two-language navigation commands
//!   locally, before any network round trip
//! - **Reply consumer**: streams answers from the configured backend over
//!   `reqwest`, degrading to a fixed apology on failure
//! - **Speech coordinator**: speaks finalized replies via the platform
//!   synthesizer, keeping the microphone and speaker mutually exclusive
//! - **Session orchestrator**: owns the turn log and the mode flags, and is
//!   the engine's public surface
//!
//! Capture and synthesis are ports ([`platform`]); the embedding
//! application supplies the implementations.

pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod intent;
pub mod language;
pub mod platform;
pub mod recognition;
pub mod reply;
pub mod session;
pub mod speakable;
pub mod speech;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::EngineEvent;
pub use intent::{CatalogEntry, Intent, IntentResolver};
pub use language::Language;
pub use session::{EngineHandle, EnginePorts, Role, Turn, VoiceEngine};
