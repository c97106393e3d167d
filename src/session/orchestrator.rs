//! The session orchestrator: one event loop that owns the conversation.
//!
//! Every piece of mutable session state lives here: the append-only turn
//! log, the two voice mode flags, the transcript gate, the reply generation
//! counter, and the capture resume flag. The capture manager, speech
//! coordinator, and reply runs are separate tasks that only talk to this
//! loop through channels, so user commands and stage updates are serialized
//! and there is nothing to lock.
//!
//! The orchestrator is also the only component allowed to change the mode
//! flags. Stages read them through shared [`AtomicBool`]s at their own
//! decision points (restart, resume) but never write them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::gate::{GateDecision, TranscriptCandidate, TranscriptGate};
use crate::intent::{CatalogEntry, Intent, IntentResolver, default_catalog};
use crate::platform::capture::CaptureBackend;
use crate::platform::synthesis::{SynthesisOutcome, Synthesizer};
use crate::recognition::{self, RecognitionCommand, RecognitionControl, RecognitionUpdate};
use crate::reply::{BackendIntent, HistoryTurn, ReplyClient, ReplyEvent, ReplyQuery};
use crate::session::messages::{EngineCommand, Turn};
use crate::speech::{self, SpeechCommand, SpeechControl};
use crate::store::{StateStore, VOICE_INPUT_KEY, VOICE_OUTPUT_KEY};

/// Platform ports supplied by the embedding application.
pub struct EnginePorts {
    /// Speech capture implementation.
    pub capture: Arc<dyn CaptureBackend>,
    /// Speech synthesis implementation.
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Cloneable handle for talking to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    events_tx: broadcast::Sender<EngineEvent>,
    voice_input: Arc<AtomicBool>,
    voice_output: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// Whether continuous voice capture is currently enabled.
    pub fn voice_input(&self) -> bool {
        self.voice_input.load(Ordering::Relaxed)
    }

    /// Whether replies are currently spoken aloud.
    pub fn voice_output(&self) -> bool {
        self.voice_output.load(Ordering::Relaxed)
    }

    /// Submit a typed message. Typed input bypasses the transcript gate.
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SubmitText { text: text.into() })
    }

    /// Turn continuous voice capture on or off.
    pub fn set_voice_input(&self, enabled: bool) -> Result<()> {
        self.send(EngineCommand::SetVoiceInput { enabled })
    }

    /// Turn spoken replies on or off.
    pub fn set_voice_output(&self, enabled: bool) -> Result<()> {
        self.send(EngineCommand::SetVoiceOutput { enabled })
    }

    /// Attach a topic hint to future backend queries, or clear it.
    pub fn set_context_tag(&self, tag: Option<String>) -> Result<()> {
        self.send(EngineCommand::SetContextTag { tag })
    }

    /// Copy of the session log right now.
    pub async fn snapshot(&self) -> Result<Vec<Turn>> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot { reply: tx })?;
        rx.await
            .map_err(|_| EngineError::Channel("engine stopped before answering".to_owned()))
    }

    fn send(&self, cmd: EngineCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| EngineError::Channel("engine loop stopped".to_owned()))
    }
}

/// A running voice interaction engine.
///
/// Spawns the orchestrator loop and its stage tasks; must be created inside
/// a tokio runtime. Interact through [`VoiceEngine::handle`], stop with
/// [`VoiceEngine::shutdown`].
pub struct VoiceEngine {
    handle: EngineHandle,
    join: JoinHandle<()>,
}

impl VoiceEngine {
    /// Start the engine with the built-in navigation catalog.
    pub fn start(config: EngineConfig, ports: EnginePorts) -> Result<Self> {
        Self::start_with_catalog(config, ports, default_catalog())
    }

    /// Start the engine with an application-supplied navigation catalog.
    pub fn start_with_catalog(
        config: EngineConfig,
        ports: EnginePorts,
        catalog: Vec<CatalogEntry>,
    ) -> Result<Self> {
        let store = StateStore::new(&config.store)?;
        let reply_client = ReplyClient::new(config.reply.clone())?;

        let voice_input = Arc::new(AtomicBool::new(store.load_flag(VOICE_INPUT_KEY, false)));
        let voice_output = Arc::new(AtomicBool::new(store.load_flag(VOICE_OUTPUT_KEY, true)));
        let turns = store.load_turns(config.language);

        let (events_tx, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let (recog_updates_tx, recog_rx) = mpsc::unbounded_channel();
        let (recognition_tx, _recog_join) = recognition::spawn(RecognitionControl {
            backend: ports.capture,
            language: config.language,
            config: config.recognition.clone(),
            voice_input: Arc::clone(&voice_input),
            updates_tx: recog_updates_tx,
            events_tx: events_tx.clone(),
            cancel: cancel.child_token(),
        });

        let (speech_updates_tx, speech_rx) = mpsc::unbounded_channel();
        let (speech_tx, _speech_join) = speech::spawn(SpeechControl {
            synthesizer: ports.synthesizer,
            language: config.language,
            config: config.voice.clone(),
            updates_tx: speech_updates_tx,
            events_tx: events_tx.clone(),
            cancel: cancel.child_token(),
        });

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let gate = TranscriptGate::new(Duration::from_millis(config.gate.submit_lock_ms));
        let resolver = IntentResolver::new(catalog);

        let orchestrator = Orchestrator {
            store,
            resolver,
            gate,
            reply_client,
            recognition_tx,
            speech_tx,
            recog_rx,
            speech_rx,
            reply_tx,
            reply_rx,
            events_tx: events_tx.clone(),
            cancel,
            turns,
            voice_input: Arc::clone(&voice_input),
            voice_output: Arc::clone(&voice_output),
            context_tag: None,
            generation: 0,
            pending: None,
            speaking: false,
            resume_capture: false,
            resume_at: None,
            config,
        };
        let join = tokio::spawn(orchestrator.run(cmd_rx));

        Ok(Self {
            handle: EngineHandle {
                cmd_tx,
                events_tx,
                voice_input,
                voice_output,
            },
            join,
        })
    }

    /// Handle for submitting messages and subscribing to events.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.handle.subscribe()
    }

    /// Stop every component, persist the session log, and wait for the
    /// loop to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.handle.cmd_tx.send(EngineCommand::Shutdown);
        self.join
            .await
            .map_err(|e| EngineError::Channel(format!("engine loop failed: {e}")))
    }
}

struct Orchestrator {
    config: EngineConfig,
    store: StateStore,
    resolver: IntentResolver,
    gate: TranscriptGate,
    reply_client: ReplyClient,

    recognition_tx: mpsc::UnboundedSender<RecognitionCommand>,
    speech_tx: mpsc::UnboundedSender<SpeechCommand>,
    recog_rx: mpsc::UnboundedReceiver<RecognitionUpdate>,
    speech_rx: mpsc::UnboundedReceiver<SynthesisOutcome>,
    reply_tx: mpsc::UnboundedSender<(u64, ReplyEvent)>,
    reply_rx: mpsc::UnboundedReceiver<(u64, ReplyEvent)>,
    events_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,

    turns: Vec<Turn>,
    voice_input: Arc<AtomicBool>,
    voice_output: Arc<AtomicBool>,
    context_tag: Option<String>,

    /// Generation of the newest reply run; events from older runs are
    /// dropped.
    generation: u64,
    /// Index of the assistant turn a reply run is streaming into.
    pending: Option<usize>,
    /// Whether an utterance is in flight at the speech coordinator.
    speaking: bool,
    /// Whether capture should come back once playback finishes.
    resume_capture: bool,
    /// When the post-playback settle delay elapses.
    resume_at: Option<tokio::time::Instant>,
}

impl Orchestrator {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>) {
        if self.voice_input.load(Ordering::Relaxed) {
            info!("restoring continuous capture from the previous session");
            self.send_recognition(RecognitionCommand::Enable);
        }

        loop {
            // Settle timer as a future that never resolves while no resume
            // is scheduled.
            let resume_at = self.resume_at;
            let resume_due = async move {
                match resume_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                update = self.recog_rx.recv() => {
                    let Some(update) = update else {
                        warn!("capture manager stopped unexpectedly");
                        break;
                    };
                    match update {
                        RecognitionUpdate::Final(candidate) => {
                            self.handle_transcript(candidate);
                        }
                        RecognitionUpdate::Fatal { alert } => {
                            self.handle_capture_fatal(alert);
                        }
                    }
                }
                event = self.reply_rx.recv() => {
                    // The orchestrator holds a sender, so this stays open.
                    let Some((generation, event)) = event else { break };
                    if generation == self.generation {
                        self.handle_reply_event(event);
                    } else {
                        debug!("dropping reply event from a superseded run");
                    }
                }
                outcome = self.speech_rx.recv() => {
                    let Some(outcome) = outcome else {
                        warn!("speech coordinator stopped unexpectedly");
                        break;
                    };
                    self.handle_playback_done(outcome);
                }
                () = resume_due => {
                    self.resume_at = None;
                    // The flag may have flipped during the settle delay.
                    if self.voice_input.load(Ordering::Relaxed) {
                        self.send_recognition(RecognitionCommand::Resume);
                    }
                }
            }
        }

        self.cancel.cancel();
        self.persist_turns();
        info!("engine loop stopped");
    }

    /// Returns false when the engine should stop.
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::SubmitText { text } => {
                let text = text.trim().to_owned();
                if text.is_empty() {
                    return true;
                }
                if self.pending.is_some() {
                    debug!("a reply is already in flight, dropping typed submission");
                    return true;
                }
                self.begin_turn(text);
            }
            EngineCommand::SetVoiceInput { enabled } => self.set_voice_input(enabled),
            EngineCommand::SetVoiceOutput { enabled } => self.set_voice_output(enabled),
            EngineCommand::SetContextTag { tag } => {
                self.context_tag = tag.filter(|t| !t.trim().is_empty());
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.turns.clone());
            }
            EngineCommand::Shutdown => {
                info!("engine shutdown requested");
                return false;
            }
        }
        true
    }

    fn handle_transcript(&mut self, candidate: TranscriptCandidate) {
        if self.pending.is_some() {
            debug!("a reply is already in flight, dropping transcript");
            return;
        }
        match self.gate.offer(&candidate.text, candidate.heard_at) {
            GateDecision::Accepted => self.begin_turn(candidate.text),
            GateDecision::DuplicateOfLast => {
                debug!("transcript repeats the previous submission, dropped");
            }
            GateDecision::Locked => {
                debug!("transcript arrived inside the submission lock, dropped");
            }
        }
    }

    fn handle_capture_fatal(&mut self, alert: String) {
        warn!("continuous capture gave up: {alert}");
        self.voice_input.store(false, Ordering::Relaxed);
        self.store.save_flag(VOICE_INPUT_KEY, false);
        self.resume_capture = false;
        self.emit_modes();
        self.emit(EngineEvent::Alert { message: alert });
    }

    /// One accepted user message: append it, classify it, and either
    /// short-circuit to navigation or start a reply run.
    fn begin_turn(&mut self, text: String) {
        match self.resolver.resolve(&text) {
            Intent::Navigate { target } => {
                info!("message resolved to navigation: {target}");
                self.push_turn(Turn::user(text));
                let ack = self.language().navigation_ack().to_owned();
                self.push_turn(Turn::assistant(ack.clone()));
                self.persist_turns();
                self.emit(EngineEvent::Navigate { target });
                if self.voice_output.load(Ordering::Relaxed) {
                    self.start_playback(ack);
                }
            }
            Intent::Answer => {
                // History covers the turns before this message.
                let history = self.history_for_query();
                self.push_turn(Turn::user(text.clone()));
                self.persist_turns();
                self.begin_query(text, history);
            }
        }
    }

    fn begin_query(&mut self, message: String, history: Vec<HistoryTurn>) {
        self.generation += 1;
        let index = self.push_turn(Turn::assistant(""));
        self.pending = Some(index);
        let query = ReplyQuery {
            message,
            language: self.language(),
            history,
            context_tag: self.context_tag.clone(),
        };
        self.reply_client
            .spawn_query(query, self.generation, self.reply_tx.clone());
    }

    fn handle_reply_event(&mut self, event: ReplyEvent) {
        let Some(index) = self.pending else {
            debug!("reply event with no turn in progress, dropped");
            return;
        };
        match event {
            ReplyEvent::Delta { text } => {
                if let Some(turn) = self.turns.get_mut(index) {
                    turn.text.push_str(&text);
                    let text = turn.text.clone();
                    self.emit(EngineEvent::TurnUpdated { index, text });
                }
            }
            ReplyEvent::Completed { text, intent } => {
                self.pending = None;
                if let Some(turn) = self.turns.get_mut(index) {
                    // The completion carries the authoritative text; it
                    // replaces whatever was accumulated (an apology may
                    // follow partial deltas).
                    turn.text = text.clone();
                }
                self.emit(EngineEvent::TurnUpdated {
                    index,
                    text: text.clone(),
                });
                self.emit(EngineEvent::TurnFinalized { index });
                self.persist_turns();
                if let Some(BackendIntent::Navigate { target }) = intent {
                    info!("backend attached a navigation intent: {target}");
                    self.emit(EngineEvent::Navigate { target });
                }
                if self.voice_output.load(Ordering::Relaxed) {
                    self.start_playback(text);
                }
            }
        }
    }

    /// Hand the speaker to the synthesis coordinator. Capture goes cold
    /// first and comes back on the resume path.
    fn start_playback(&mut self, text: String) {
        self.resume_capture = self.voice_input.load(Ordering::Relaxed);
        if self.resume_capture {
            self.send_recognition(RecognitionCommand::Pause);
        }
        self.resume_at = None;
        self.speaking = true;
        self.send_speech(SpeechCommand::Speak { text });
    }

    fn handle_playback_done(&mut self, outcome: SynthesisOutcome) {
        debug!("playback resolved: {outcome:?}");
        self.speaking = false;
        if self.resume_capture {
            self.resume_capture = false;
            let delay = Duration::from_millis(self.config.voice.resume_delay_ms);
            self.resume_at = Some(tokio::time::Instant::now() + delay);
        }
    }

    fn set_voice_input(&mut self, enabled: bool) {
        if self.voice_input.load(Ordering::Relaxed) == enabled {
            return;
        }
        self.voice_input.store(enabled, Ordering::Relaxed);
        self.store.save_flag(VOICE_INPUT_KEY, enabled);
        self.emit_modes();
        if enabled {
            if self.speaking {
                // The speaker holds the audio path; capture starts on the
                // resume path after playback.
                self.resume_capture = true;
            } else {
                self.send_recognition(RecognitionCommand::Enable);
            }
        } else {
            self.resume_capture = false;
            self.send_recognition(RecognitionCommand::Disable);
        }
    }

    fn set_voice_output(&mut self, enabled: bool) {
        if self.voice_output.load(Ordering::Relaxed) == enabled {
            return;
        }
        self.voice_output.store(enabled, Ordering::Relaxed);
        self.store.save_flag(VOICE_OUTPUT_KEY, enabled);
        self.emit_modes();
        if !enabled && self.speaking {
            self.send_speech(SpeechCommand::Cancel);
        }
    }

    fn history_for_query(&self) -> Vec<HistoryTurn> {
        let take = self.config.reply.history_turns;
        let start = self.turns.len().saturating_sub(take);
        self.turns[start..]
            .iter()
            .map(|t| HistoryTurn {
                role: t.role,
                content: t.text.clone(),
            })
            .collect()
    }

    fn push_turn(&mut self, turn: Turn) -> usize {
        let index = self.turns.len();
        self.turns.push(turn.clone());
        self.emit(EngineEvent::TurnAdded { index, turn });
        index
    }

    fn persist_turns(&self) {
        if let Err(e) = self.store.save_turns(&self.turns) {
            warn!("failed to persist the session log: {e}");
        }
    }

    fn emit_modes(&self) {
        self.emit(EngineEvent::ModeChanged {
            voice_input: self.voice_input.load(Ordering::Relaxed),
            voice_output: self.voice_output.load(Ordering::Relaxed),
        });
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    fn send_recognition(&self, cmd: RecognitionCommand) {
        if self.recognition_tx.send(cmd).is_err() {
            warn!("capture manager is gone");
        }
    }

    fn send_speech(&self, cmd: SpeechCommand) {
        if self.speech_tx.send(cmd).is_err() {
            warn!("speech coordinator is gone");
        }
    }

    fn language(&self) -> crate::language::Language {
        self.config.language
    }
}
