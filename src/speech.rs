//! Speech synthesis coordination.
//!
//! At most one utterance plays at a time. A newer request cancels whatever
//! is still in flight, a request identical to the pronounced text of the
//! previous one is skipped, and every request eventually produces exactly
//! one outcome on the updates channel so the orchestrator can hand the
//! microphone back. Failures resolve like completions; a broken speaker
//! must never wedge capture in the paused state.
//!
//! Utterance ids guard the completion path: when a cancelled utterance
//! finally resolves after its replacement started, its outcome is dropped
//! instead of ending the replacement's turn.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::VoiceConfig;
use crate::events::EngineEvent;
use crate::language::Language;
use crate::platform::synthesis::{SpeechRequest, SynthesisOutcome, Synthesizer, select_voice};
use crate::speakable::speakable_text;

/// Control messages from the orchestrator.
#[derive(Debug, Clone)]
pub(crate) enum SpeechCommand {
    /// Clean `text` into speakable form and play it, cancelling any
    /// in-flight utterance.
    Speak { text: String },
    /// Stop any in-flight utterance.
    Cancel,
}

/// Bundled dependencies for the speech coordinator task.
pub(crate) struct SpeechControl {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub language: Language,
    pub config: VoiceConfig,
    /// One outcome per request that reached playback (or was absorbed by
    /// an in-flight utterance covering the same pause).
    pub updates_tx: mpsc::UnboundedSender<SynthesisOutcome>,
    pub events_tx: broadcast::Sender<EngineEvent>,
    pub cancel: CancellationToken,
}

/// Spawn the speech coordinator task. Returns its command mailbox.
pub(crate) fn spawn(ctl: SpeechControl) -> (mpsc::UnboundedSender<SpeechCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_speech_coordinator(ctl, cmd_rx));
    (cmd_tx, handle)
}

struct SpeechCoordinator {
    ctl: SpeechControl,
    outcome_tx: mpsc::UnboundedSender<(u64, SynthesisOutcome)>,
    /// Utterance id currently in flight, if any.
    current: Option<u64>,
    uid_seq: u64,
    /// Pronounced text of the most recent dispatched utterance.
    last_spoken: Option<String>,
}

async fn run_speech_coordinator(
    ctl: SpeechControl,
    mut cmd_rx: mpsc::UnboundedReceiver<SpeechCommand>,
) {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<(u64, SynthesisOutcome)>();
    let mut co = SpeechCoordinator {
        ctl,
        outcome_tx,
        current: None,
        uid_seq: 0,
        last_spoken: None,
    };

    loop {
        tokio::select! {
            () = co.ctl.cancel.cancelled() => {
                if co.current.is_some() {
                    co.ctl.synthesizer.cancel();
                }
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SpeechCommand::Speak { text } => co.speak(text).await,
                    SpeechCommand::Cancel => {
                        if co.current.is_some() {
                            debug!("cancelling in-flight utterance");
                            co.ctl.synthesizer.cancel();
                        }
                    }
                }
            }
            outcome = outcome_rx.recv() => {
                // The coordinator holds a sender, so the channel stays open.
                let Some((uid, outcome)) = outcome else { break };
                co.handle_outcome(uid, outcome);
            }
        }
    }
}

impl SpeechCoordinator {
    async fn speak(&mut self, text: String) {
        let cleaned = speakable_text(&text);
        if cleaned.is_empty() {
            debug!("nothing speakable in the request, resolving immediately");
            self.absorb_or_resolve();
            return;
        }
        if self.last_spoken.as_deref() == Some(cleaned.as_str()) {
            debug!("skipping utterance identical to the previous one");
            self.absorb_or_resolve();
            return;
        }
        if self.current.is_some() {
            // The newer utterance wins.
            self.ctl.synthesizer.cancel();
        }

        let voices = self.ctl.synthesizer.voices().await;
        let voice = select_voice(
            &voices,
            self.ctl.config.preferred_names(self.ctl.language),
            self.ctl.language,
            self.ctl.config.preferred_gender,
        );
        match &voice {
            Some(v) => debug!("speaking with voice {:?}", v.name),
            None => debug!("no matching voice, using the platform default"),
        }

        self.uid_seq += 1;
        let uid = self.uid_seq;
        self.current = Some(uid);
        self.last_spoken = Some(cleaned.clone());
        self.emit(EngineEvent::Speaking { active: true });

        let request = SpeechRequest {
            text: cleaned,
            language: self.ctl.language,
            voice,
            rate: self.ctl.config.rate,
        };
        let synthesizer = Arc::clone(&self.ctl.synthesizer);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = synthesizer.speak(request).await;
            let _ = outcome_tx.send((uid, outcome));
        });
    }

    fn handle_outcome(&mut self, uid: u64, outcome: SynthesisOutcome) {
        if self.current != Some(uid) {
            debug!("dropping outcome from a superseded utterance");
            return;
        }
        self.current = None;
        self.emit(EngineEvent::Speaking { active: false });
        match &outcome {
            SynthesisOutcome::Completed => {}
            SynthesisOutcome::Cancelled => {
                // The user never heard the whole thing; let it be retried.
                self.last_spoken = None;
            }
            SynthesisOutcome::Failed { reason } => {
                warn!("speech synthesis failed: {reason}");
                self.last_spoken = None;
            }
        }
        let _ = self.ctl.updates_tx.send(outcome);
    }

    /// Resolve a request that will not reach playback. If an utterance is
    /// still in flight its own outcome covers the caller's pause, so no
    /// extra resolution is sent.
    fn absorb_or_resolve(&self) {
        if self.current.is_none() {
            let _ = self.ctl.updates_tx.send(SynthesisOutcome::Completed);
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.ctl.events_tx.send(event);
    }
}
