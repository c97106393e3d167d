//! Platform ports for speech capture and synthesis.
//!
//! The engine orchestrates conversation state; it does not bundle an audio
//! stack. Concrete backends (a web speech bridge, a native recognizer, a
//! test double) implement these traits and are injected when the engine is
//! built. Backends translate platform callbacks into channel messages and
//! nothing more; every lifecycle decision stays in the engine.

pub mod capture;
pub mod synthesis;

pub use capture::{CaptureBackend, CaptureErrorKind, CaptureEvent, CaptureHandle};
pub use synthesis::{SpeechRequest, SynthesisOutcome, Synthesizer, VoiceInfo, select_voice};
