//! Error types for the voice engine.

/// Top-level error type for the continuous voice interaction engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Speech capture (microphone / recognition backend) error.
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech synthesis (voice output) error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Reply backend (HTTP query service) error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Session log / mode flag persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
