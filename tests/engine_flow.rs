//! End-to-end engine tests over fake audio ports and a mock reply backend.
//!
//! These drive the public surface only: commands in through the handle,
//! events and snapshots out, HTTP verified against a wiremock server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kotha::config::{EngineConfig, StoreConfig};
use kotha::platform::capture::{CaptureBackend, CaptureEvent, CaptureHandle};
use kotha::platform::synthesis::{SpeechRequest, SynthesisOutcome, Synthesizer, VoiceInfo};
use kotha::{EngineEvent, EngineHandle, EnginePorts, Language, Role, Turn, VoiceEngine};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ────────────────────────────────────────────────────────────────────────────
// Fake platform ports
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeCapture {
    session_txs: Mutex<Vec<mpsc::UnboundedSender<CaptureEvent>>>,
}

impl FakeCapture {
    fn begins(&self) -> usize {
        self.session_txs.lock().unwrap().len()
    }

    fn session_tx(&self, index: usize) -> mpsc::UnboundedSender<CaptureEvent> {
        self.session_txs.lock().unwrap()[index].clone()
    }
}

impl CaptureBackend for FakeCapture {
    fn begin(
        &self,
        _language: Language,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> kotha::Result<Box<dyn CaptureHandle>> {
        self.session_txs.lock().unwrap().push(events);
        Ok(Box::new(NopHandle))
    }
}

struct NopHandle;

impl CaptureHandle for NopHandle {
    fn detach(&mut self) {}
    fn stop(&mut self) {}
    fn abort(&mut self) {}
}

#[derive(Default)]
struct FakeSynth {
    spoken: Mutex<Vec<String>>,
}

impl FakeSynth {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }

    async fn speak(&self, request: SpeechRequest) -> SynthesisOutcome {
        self.spoken.lock().unwrap().push(request.text);
        SynthesisOutcome::Completed
    }

    fn cancel(&self) {}
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

struct Rig {
    engine: VoiceEngine,
    capture: Arc<FakeCapture>,
    synth: Arc<FakeSynth>,
    _dir: TempDir,
}

fn engine_config(dir: &TempDir, endpoint: String, api_key: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.store = StoreConfig {
        root_dir: Some(dir.path().to_path_buf()),
        namespace: "kotha-e2e".to_owned(),
        turn_cap: 50,
    };
    config.reply.endpoint = endpoint;
    config.reply.api_key = api_key.to_owned();
    config.reply.timeout_ms = 3_000;
    config.recognition.restart_backoff_ms = 5;
    config.gate.submit_lock_ms = 50;
    config.voice.resume_delay_ms = 5;
    config
}

fn start_engine(config: EngineConfig, dir: TempDir) -> Rig {
    let capture = Arc::new(FakeCapture::default());
    let synth = Arc::new(FakeSynth::default());
    let engine = VoiceEngine::start(
        config,
        EnginePorts {
            capture: Arc::clone(&capture) as Arc<dyn CaptureBackend>,
            synthesizer: Arc::clone(&synth) as Arc<dyn Synthesizer>,
        },
    )
    .expect("engine should start");
    Rig {
        engine,
        capture,
        synth,
        _dir: dir,
    }
}

/// Snapshot repeatedly until the log satisfies `cond`; returns it.
async fn turns_once(handle: &EngineHandle, cond: impl Fn(&[Turn]) -> bool) -> Vec<Turn> {
    for _ in 0..400 {
        let turns = handle.snapshot().await.expect("snapshot");
        if cond(&turns) {
            return turns;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session log never reached the expected shape");
}

/// Poll until `cond` holds or a generous deadline passes.
async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ────────────────────────────────────────────────────────────────────────────
// Reply backend contract
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn streamed_reply_lands_in_the_turn_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "message": "what is gravity?",
            "language": "en"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("Gravity pulls masses together.", "text/plain; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();
    let mut events = handle.subscribe();

    handle.submit_text("what is gravity?").unwrap();
    let turns = turns_once(&handle, |t| {
        t.len() == 3 && t[2].text == "Gravity pulls masses together."
    })
    .await;
    assert_eq!(turns[1].role, Role::User);
    assert_eq!(turns[2].role, Role::Assistant);

    // The reply streamed into the log: each update extends the previous
    // one, and the last matches the finalized turn.
    let mut updates: Vec<String> = Vec::new();
    let mut saw_final = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::TurnUpdated { text, .. } => updates.push(text),
            EngineEvent::TurnFinalized { .. } => saw_final = true,
            _ => {}
        }
    }
    assert!(!updates.is_empty() && saw_final);
    for pair in updates.windows(2) {
        assert!(pair[1].starts_with(&pair[0]));
    }
    assert_eq!(updates.last().unwrap(), "Gravity pulls masses together.");

    // The greeting travelled as history; no context tag was attached.
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["history"][0]["role"], "assistant");
    assert_eq!(body["history"][0]["content"], Language::En.greeting());
    assert!(body.get("contextTag").is_none());

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn json_reply_with_backend_intent_navigates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reply": "Opening physics for you.",
            "intent": {"type": "navigate", "target": "/physics"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();
    let mut events = handle.subscribe();

    handle.submit_text("tell me about black holes").unwrap();
    let turns = turns_once(&handle, |t| {
        t.len() == 3 && t[2].text == "Opening physics for you."
    })
    .await;
    assert_eq!(turns[2].role, Role::Assistant);

    let mut navigated = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Navigate { target } = event {
            navigated = Some(target);
        }
    }
    assert_eq!(navigated.as_deref(), Some("/physics"));

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn backend_failure_substitutes_the_apology_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();

    handle.submit_text("anyone home?").unwrap();
    let turns = turns_once(&handle, |t| t.len() == 3 && !t[2].text.is_empty()).await;
    assert_eq!(turns[2].text, Language::En.reply_apology());

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_credentials_skip_the_network_entirely() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("never sent", "text/plain"))
        .expect(0)
        .mount(&server)
        .await;

    // Endpoint configured, key missing: not enough to query.
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();

    handle.submit_text("hello?").unwrap();
    let turns = turns_once(&handle, |t| t.len() == 3 && !t[2].text.is_empty()).await;
    assert_eq!(turns[2].text, Language::En.reply_apology());
    assert!(server.received_requests().await.unwrap().is_empty());

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn context_tag_rides_along_until_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({"contextTag": "physics"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw("tagged", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("untagged", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();

    handle.set_context_tag(Some("physics".to_owned())).unwrap();
    handle.submit_text("first question").unwrap();
    let _ = turns_once(&handle, |t| t.len() == 3 && t[2].text == "tagged").await;

    handle.set_context_tag(None).unwrap();
    handle.submit_text("second question").unwrap();
    let _ = turns_once(&handle, |t| t.len() == 5 && t[4].text == "untagged").await;

    let requests = server.received_requests().await.unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert!(second.get("contextTag").is_none());

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn history_is_capped_at_the_last_four_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();

    for (question, expected_len) in [("one", 3), ("two", 5), ("three", 7), ("four", 9)] {
        handle.submit_text(question).unwrap();
        let _ = turns_once(&handle, move |t| {
            t.len() == expected_len && t[expected_len - 1].text == "ok"
        })
        .await;
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    let last: serde_json::Value = serde_json::from_slice(&requests[3].body).unwrap();
    let history = last["history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0]["content"], "two");
    assert_eq!(history[1]["content"], "ok");
    assert_eq!(history[2]["content"], "three");
    assert_eq!(history[3]["content"], "ok");

    rig.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn bengali_language_rides_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({"language": "bn"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ঠিক আছে।", "text/plain; charset=utf-8"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    config.language = Language::Bn;
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();

    handle.submit_text("তুমি কেমন আছো?").unwrap();
    let turns = turns_once(&handle, |t| t.len() == 3 && !t[2].text.is_empty()).await;
    assert_eq!(turns[0].text, Language::Bn.greeting());
    assert_eq!(turns[2].text, "ঠিক আছে।");

    rig.engine.shutdown().await.unwrap();
}

// ────────────────────────────────────────────────────────────────────────────
// Voice round trip
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn voice_navigation_never_queries_the_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("never sent", "text/plain"))
        .expect(0)
        .mount(&server)
        .await;

    // Credentials are fully configured; the short-circuit is what keeps
    // the network quiet.
    let dir = TempDir::new().unwrap();
    let config = engine_config(&dir, format!("{}/query", server.uri()), "test-key");
    let rig = start_engine(config, dir);
    let handle = rig.engine.handle();
    let mut events = handle.subscribe();

    handle.set_voice_input(true).unwrap();
    let capture = Arc::clone(&rig.capture);
    eventually(move || capture.begins() == 1).await;
    let tx = rig.capture.session_tx(0);
    tx.send(CaptureEvent::Started).unwrap();
    tx.send(CaptureEvent::Final {
        text: "go to physics".to_owned(),
    })
    .unwrap();

    let turns = turns_once(&handle, |t| t.len() == 3).await;
    assert_eq!(turns[1].text, "go to physics");
    assert_eq!(turns[2].text, Language::En.navigation_ack());

    let mut navigated = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Navigate { target } = event {
            navigated = Some(target);
        }
    }
    assert_eq!(navigated.as_deref(), Some("/physics"));

    // The acknowledgement is spoken aloud.
    let synth = Arc::clone(&rig.synth);
    eventually(move || synth.spoken() == vec!["Sure, here we go!"]).await;

    assert!(server.received_requests().await.unwrap().is_empty());
    rig.engine.shutdown().await.unwrap();
}
