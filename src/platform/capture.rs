//! Continuous speech capture port.

use crate::error::Result;
use crate::language::Language;
use tokio::sync::mpsc;

/// Events one capture session delivers, in order, over its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The platform actually began listening.
    Started,
    /// Partial hypothesis while the user is still speaking.
    Interim { text: String },
    /// Finalized utterance span.
    Final { text: String },
    /// The session ended on its own (silence deadline, stream closed).
    Ended,
    /// The session failed. A failed session is dead and will not emit again.
    Error { kind: CaptureErrorKind },
}

/// Capture failure kinds, mirroring what platform recognizers report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// The user or platform policy denied microphone permission.
    PermissionDenied,
    /// No usable input device.
    NoDevice,
    /// The recognizer's network service failed.
    Network,
    /// Nothing was heard before the platform's silence deadline.
    NoSpeech,
    /// A start was attempted while another platform session was live.
    AlreadyStarted,
    /// The session was torn down locally.
    Aborted,
    /// Anything the platform reports without a mapped kind.
    Other(String),
}

/// Live capture session handed out by [`CaptureBackend::begin`].
pub trait CaptureHandle: Send {
    /// Stop delivering events. The platform session may keep running
    /// briefly, but everything it emits afterwards goes nowhere.
    fn detach(&mut self);

    /// Ask the platform to finish gracefully, flushing a pending final.
    fn stop(&mut self);

    /// Drop the platform session immediately, discarding pending audio.
    fn abort(&mut self);
}

/// Continuous speech capture backend.
pub trait CaptureBackend: Send + Sync {
    /// Start one continuous capture session; events flow into `events`
    /// until the session ends, errors, or is detached.
    ///
    /// Classified failures (permission, device, network) are delivered as
    /// [`CaptureEvent::Error`] through the channel, not as a return value.
    ///
    /// # Errors
    ///
    /// Returns an error only when the session object itself cannot be
    /// constructed.
    fn begin(
        &self,
        language: Language,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<Box<dyn CaptureHandle>>;
}
