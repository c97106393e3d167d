//! Transcript submission gate.
//!
//! Continuous recognizers fire the same finalized utterance more than once
//! (notably around restarts) and can emit two finals in quick succession
//! when playback echo leaks into the microphone. The gate sits between
//! recognition and the query pipeline and enforces three rules:
//!
//! 1. only finalized transcripts are offered at all (interims drive the
//!    "hearing" affordance upstream and never reach the gate);
//! 2. a transcript textually identical to the previously accepted one is
//!    dropped;
//! 3. after an acceptance the gate stays locked for a grace window, and
//!    anything offered while locked is dropped.
//!
//! Pure state machine over caller-supplied instants, so every window is
//! testable without sleeping.

use std::time::{Duration, Instant};

/// A finalized span of recognized speech on its way to the gate.
#[derive(Debug, Clone)]
pub struct TranscriptCandidate {
    /// Recognized text with recognizer whitespace trimmed off.
    pub text: String,
    /// When the final arrived from the platform.
    pub heard_at: Instant,
}

impl TranscriptCandidate {
    /// Candidate heard right now.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heard_at: Instant::now(),
        }
    }
}

/// Outcome of offering one finalized transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Hand the transcript to the query pipeline.
    Accepted,
    /// Identical to the previously accepted transcript; dropped.
    DuplicateOfLast,
    /// A submission was accepted too recently; dropped.
    Locked,
}

/// Deduplicates and serializes finalized transcripts.
#[derive(Debug)]
pub struct TranscriptGate {
    lock_window: Duration,
    last_accepted: Option<String>,
    locked_until: Option<Instant>,
}

impl TranscriptGate {
    /// Gate with the given post-acceptance lock window.
    pub fn new(lock_window: Duration) -> Self {
        Self {
            lock_window,
            last_accepted: None,
            locked_until: None,
        }
    }

    /// Offer one finalized transcript at time `now`.
    ///
    /// Comparison is exact; callers trim recognizer whitespace first.
    pub fn offer(&mut self, text: &str, now: Instant) -> GateDecision {
        if self.last_accepted.as_deref() == Some(text) {
            return GateDecision::DuplicateOfLast;
        }
        if self.locked_until.is_some_and(|until| now < until) {
            return GateDecision::Locked;
        }
        self.last_accepted = Some(text.to_owned());
        self.locked_until = Some(now + self.lock_window);
        GateDecision::Accepted
    }
}
