//! Continuous capture lifecycle.
//!
//! Platform capture sessions are single-shot: they start, emit events, and
//! die, whether from a silence deadline, a service hiccup, or being told to
//! stop. Continuous voice mode needs a microphone that stays hot anyway, so
//! this manager recreates sessions for as long as the voice input flag says
//! so, classifies failures into retryable and fatal, and keeps anything a
//! dead session emits late away from the conversation.
//!
//! The manager is a single task owning an explicit state machine:
//!
//! ```text
//! Idle -> Starting -> Listening -> (Ending | Erroring) -> Restarting -> Starting
//!                                                      \-> Idle
//! ```
//!
//! Sessions are never reused across restarts; each attempt gets a fresh
//! platform handle and a fresh monotonic id. Events are stamped with their
//! session's id on the way in and dropped unless the id matches the active
//! session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::events::EngineEvent;
use crate::gate::TranscriptCandidate;
use crate::language::Language;
use crate::platform::capture::{CaptureBackend, CaptureErrorKind, CaptureEvent, CaptureHandle};

/// Monotonically increasing id for one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states for continuous capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    /// No live session, none pending.
    Idle,
    /// `begin` issued, waiting for the platform's started signal.
    Starting,
    /// The platform is listening.
    Listening,
    /// The session ended on its own; deciding what happens next.
    Ending,
    /// The session failed; classifying the failure.
    Erroring,
    /// Waiting out the backoff before the next start.
    Restarting,
}

/// Control messages from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecognitionCommand {
    /// The user turned continuous voice on.
    Enable,
    /// The user turned continuous voice off.
    Disable,
    /// Tear down for assistant playback; user intent untouched.
    Pause,
    /// Playback done; recreate capture if the mode flag still says so.
    Resume,
}

/// What the manager reports up to the orchestrator.
#[derive(Debug)]
pub(crate) enum RecognitionUpdate {
    /// A finalized utterance.
    Final(TranscriptCandidate),
    /// Capture died for good this attempt; the voice input flag should
    /// drop and the user should see `alert`.
    Fatal { alert: String },
}

/// Bundled dependencies for the capture manager task.
pub(crate) struct RecognitionControl {
    pub backend: Arc<dyn CaptureBackend>,
    pub language: Language,
    pub config: RecognitionConfig,
    /// Read-only view of the orchestrator-owned voice input flag. Re-read
    /// at every restart and resume decision, never cached.
    pub voice_input: Arc<AtomicBool>,
    pub updates_tx: mpsc::UnboundedSender<RecognitionUpdate>,
    pub events_tx: broadcast::Sender<EngineEvent>,
    pub cancel: CancellationToken,
}

/// Spawn the capture manager task. Returns its command mailbox.
pub(crate) fn spawn(
    ctl: RecognitionControl,
) -> (mpsc::UnboundedSender<RecognitionCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_capture_manager(ctl, cmd_rx));
    (cmd_tx, handle)
}

/// One live capture attempt. Replaced wholesale on every restart.
struct ActiveSession {
    id: SessionId,
    handle: Box<dyn CaptureHandle>,
}

struct CaptureManager {
    ctl: RecognitionControl,
    stamped_tx: mpsc::UnboundedSender<(SessionId, CaptureEvent)>,
    state: CaptureState,
    session: Option<ActiveSession>,
    session_seq: u64,
    restart_at: Option<tokio::time::Instant>,
    /// Whether the one free retry for an unclassified error has been spent
    /// in the current listening streak.
    unknown_retry_used: bool,
}

async fn run_capture_manager(
    ctl: RecognitionControl,
    mut cmd_rx: mpsc::UnboundedReceiver<RecognitionCommand>,
) {
    let (stamped_tx, mut stamped_rx) = mpsc::unbounded_channel::<(SessionId, CaptureEvent)>();
    let mut mgr = CaptureManager {
        ctl,
        stamped_tx,
        state: CaptureState::Idle,
        session: None,
        session_seq: 0,
        restart_at: None,
        unknown_retry_used: false,
    };

    loop {
        // Backoff timer as a future that never resolves while no restart
        // is scheduled.
        let restart_at = mgr.restart_at;
        let restart_due = async move {
            match restart_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = mgr.ctl.cancel.cancelled() => {
                mgr.teardown_session();
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                mgr.handle_command(cmd);
            }
            () = restart_due => {
                mgr.restart_at = None;
                // The flag may have flipped during the backoff.
                if mgr.ctl.voice_input.load(Ordering::Relaxed) {
                    mgr.start_session();
                } else {
                    debug!("voice input turned off during restart backoff");
                    mgr.go_idle();
                }
            }
            stamped = stamped_rx.recv() => {
                // The manager holds a sender, so the channel cannot close.
                let Some((id, event)) = stamped else { break };
                if mgr.session.as_ref().map(|s| s.id) != Some(id) {
                    debug!("dropping event from stale capture session {id}");
                    continue;
                }
                mgr.handle_event(event);
            }
        }
    }
}

impl CaptureManager {
    fn handle_command(&mut self, cmd: RecognitionCommand) {
        match cmd {
            RecognitionCommand::Enable => {
                if self.state == CaptureState::Idle {
                    self.unknown_retry_used = false;
                    self.start_session();
                }
            }
            RecognitionCommand::Disable => {
                debug!("voice input disabled, stopping capture");
                self.halt();
            }
            RecognitionCommand::Pause => {
                debug!("pausing capture for assistant playback");
                self.halt();
            }
            RecognitionCommand::Resume => {
                // The flag may have flipped while the assistant was speaking.
                if self.state == CaptureState::Idle
                    && self.ctl.voice_input.load(Ordering::Relaxed)
                {
                    self.start_session();
                }
            }
        }
    }

    fn handle_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started => {
                self.set_state(CaptureState::Listening);
                self.unknown_retry_used = false;
                self.emit(EngineEvent::Listening { active: true });
            }
            CaptureEvent::Interim { text } => {
                if !text.trim().is_empty() {
                    self.emit(EngineEvent::Hearing { text });
                }
            }
            CaptureEvent::Final { text } => {
                let text = text.trim();
                if !text.is_empty() {
                    let candidate = TranscriptCandidate::now(text);
                    let _ = self
                        .ctl
                        .updates_tx
                        .send(RecognitionUpdate::Final(candidate));
                }
            }
            CaptureEvent::Ended => {
                self.set_state(CaptureState::Ending);
                self.emit(EngineEvent::Listening { active: false });
                self.teardown_session();
                self.schedule_restart_or_idle(self.restart_backoff());
            }
            CaptureEvent::Error { kind } => {
                self.set_state(CaptureState::Erroring);
                self.emit(EngineEvent::Listening { active: false });
                self.teardown_session();
                self.resolve_error(kind);
            }
        }
    }

    /// Failure classification: retry quietly, retry once, or give up and
    /// tell the user.
    fn resolve_error(&mut self, kind: CaptureErrorKind) {
        match kind {
            CaptureErrorKind::NoSpeech => {
                debug!("nothing heard before the platform deadline, restarting");
                self.schedule_restart_or_idle(Duration::ZERO);
            }
            CaptureErrorKind::AlreadyStarted => {
                debug!("platform still tearing down the previous session, restarting");
                self.schedule_restart_or_idle(self.restart_backoff());
            }
            CaptureErrorKind::Aborted => {
                debug!("capture aborted by the platform, restarting");
                self.schedule_restart_or_idle(self.restart_backoff());
            }
            CaptureErrorKind::PermissionDenied => {
                warn!("microphone permission denied");
                self.fail_fatally(self.ctl.language.permission_alert());
            }
            CaptureErrorKind::NoDevice => {
                warn!("no usable capture device");
                self.fail_fatally(self.ctl.language.device_alert());
            }
            CaptureErrorKind::Network => {
                warn!("capture service lost its connection");
                self.fail_fatally(self.ctl.language.network_alert());
            }
            CaptureErrorKind::Other(reason) => {
                if self.unknown_retry_used {
                    warn!("unclassified capture error repeated without recovery: {reason}");
                    self.fail_fatally(self.ctl.language.capture_alert());
                } else {
                    warn!("unclassified capture error, retrying once: {reason}");
                    self.unknown_retry_used = true;
                    self.schedule_restart_or_idle(self.restart_backoff());
                }
            }
        }
    }

    fn start_session(&mut self) {
        self.session_seq += 1;
        let id = SessionId(self.session_seq);

        // Per-session channel, pumped into the manager's single stamped
        // stream so late events still carry the id of the session that
        // produced them.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CaptureEvent>();
        let stamped_tx = self.stamped_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if stamped_tx.send((id, event)).is_err() {
                    break;
                }
            }
        });

        match self.ctl.backend.begin(self.ctl.language, event_tx) {
            Ok(handle) => {
                info!("capture session {id} starting");
                self.session = Some(ActiveSession { id, handle });
                self.set_state(CaptureState::Starting);
            }
            Err(e) => {
                warn!("capture session could not start: {e}");
                self.fail_fatally(self.ctl.language.capture_alert());
            }
        }
    }

    /// Full teardown: detach first so the stop's own end event goes
    /// nowhere, then ask for a graceful stop, then drop the platform
    /// session outright.
    fn teardown_session(&mut self) {
        if let Some(mut active) = self.session.take() {
            active.handle.detach();
            active.handle.stop();
            active.handle.abort();
            debug!("capture session {} torn down", active.id);
        }
    }

    /// Stop capturing without touching the user's mode flag.
    fn halt(&mut self) {
        self.restart_at = None;
        self.teardown_session();
        self.go_idle();
    }

    fn schedule_restart_or_idle(&mut self, delay: Duration) {
        if self.ctl.voice_input.load(Ordering::Relaxed) {
            self.set_state(CaptureState::Restarting);
            self.restart_at = Some(tokio::time::Instant::now() + delay);
        } else {
            self.go_idle();
        }
    }

    fn fail_fatally(&mut self, alert: &str) {
        self.restart_at = None;
        self.teardown_session();
        self.go_idle();
        let _ = self.ctl.updates_tx.send(RecognitionUpdate::Fatal {
            alert: alert.to_owned(),
        });
    }

    fn go_idle(&mut self) {
        self.set_state(CaptureState::Idle);
        self.emit(EngineEvent::Listening { active: false });
    }

    fn set_state(&mut self, next: CaptureState) {
        if next != self.state {
            debug!("capture state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.ctl.events_tx.send(event);
    }

    fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.ctl.config.restart_backoff_ms)
    }
}
