//! Streaming reply consumer.
//!
//! One backend query per accepted submission. The backend answers either
//! as a chunked `text/plain` stream (preferred; text surfaces chunk by
//! chunk) or as a single JSON object `{reply, intent?}`; the response
//! content type decides which. Failures never escape a run: every run ends
//! with exactly one [`ReplyEvent::Completed`], substituting the fixed
//! apology for the active language when anything goes wrong, and a run
//! without usable credentials resolves to the apology without touching the
//! network. Failed requests are not retried.
//!
//! Runs are tagged with a generation number chosen by the caller; a
//! consumer never cancels itself, it is abandoned by generation instead,
//! so late chunks from a superseded run can be recognized and dropped.

use crate::config::ReplyConfig;
use crate::error::{EngineError, Result};
use crate::language::Language;
use crate::session::messages::Role;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Navigation resolution the backend may attach to a JSON reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendIntent {
    /// The backend recognized a navigation request in the message.
    Navigate {
        /// Route for the embedding router.
        target: String,
    },
    /// Plain answer, nothing to do beyond showing it.
    Answer,
}

/// Events one query run emits, in order: zero or more deltas, then exactly
/// one completion.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// One decoded chunk of reply text.
    Delta { text: String },
    /// The full reply (or the apology on failure) plus any backend intent.
    Completed {
        text: String,
        intent: Option<BackendIntent>,
    },
}

/// One turn of rolling context sent with a query.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

/// Everything one query needs.
#[derive(Debug, Clone)]
pub struct ReplyQuery {
    /// The user's message.
    pub message: String,
    /// Language the reply should come back in.
    pub language: Language,
    /// Recent turns, oldest first.
    pub history: Vec<HistoryTurn>,
    /// Topic hint from the embedding app, when one is active.
    pub context_tag: Option<String>,
}

/// HTTP client for the reply backend.
#[derive(Debug, Clone)]
pub struct ReplyClient {
    http: reqwest::Client,
    config: ReplyConfig,
}

impl ReplyClient {
    /// Build the client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: ReplyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn has_credentials(&self) -> bool {
        !self.config.endpoint.is_empty() && !self.config.api_key.is_empty()
    }

    /// Spawn one query run. Events arrive on `tx` tagged with
    /// `generation`; the run always terminates with a `Completed`.
    pub(crate) fn spawn_query(
        &self,
        query: ReplyQuery,
        generation: u64,
        tx: mpsc::UnboundedSender<(u64, ReplyEvent)>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            client.run_query(query, generation, &tx).await;
        })
    }

    async fn run_query(
        &self,
        query: ReplyQuery,
        generation: u64,
        tx: &mpsc::UnboundedSender<(u64, ReplyEvent)>,
    ) {
        let apology = query.language.reply_apology();

        if !self.has_credentials() {
            debug!("reply backend not configured, substituting apology");
            let _ = tx.send((
                generation,
                ReplyEvent::Completed {
                    text: apology.to_owned(),
                    intent: None,
                },
            ));
            return;
        }

        let completed = match self.stream_reply(&query, generation, tx).await {
            Ok(event) => event,
            Err(reason) => {
                warn!("reply query failed: {reason}");
                ReplyEvent::Completed {
                    text: apology.to_owned(),
                    intent: None,
                }
            }
        };
        let _ = tx.send((generation, completed));
    }

    /// Issue the request and consume the response, emitting deltas along
    /// the way. Returns the terminal event; any error means "apologize".
    async fn stream_reply(
        &self,
        query: &ReplyQuery,
        generation: u64,
        tx: &mpsc::UnboundedSender<(u64, ReplyEvent)>,
    ) -> std::result::Result<ReplyEvent, String> {
        let body = build_query_body(query);
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(format!("backend HTTP {}: {body_text}", status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let parsed: JsonReply = response
                .json()
                .await
                .map_err(|e| format!("bad JSON reply: {e}"))?;
            return Ok(ReplyEvent::Completed {
                text: parsed.reply,
                intent: parsed.intent,
            });
        }

        // Chunked text. Decode incrementally; a chunk boundary may fall in
        // the middle of a multi-byte code point.
        let mut decoder = Utf8ChunkDecoder::new();
        let mut full = String::new();
        let mut byte_stream = response.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| format!("stream aborted: {e}"))?;
            let text = decoder.push(&bytes);
            if !text.is_empty() {
                full.push_str(&text);
                let _ = tx.send((generation, ReplyEvent::Delta { text }));
            }
        }
        let tail = decoder.flush();
        if !tail.is_empty() {
            full.push_str(&tail);
            let _ = tx.send((generation, ReplyEvent::Delta { text: tail }));
        }

        if full.is_empty() {
            return Err("backend returned an empty reply".to_owned());
        }
        Ok(ReplyEvent::Completed {
            text: full,
            intent: None,
        })
    }
}

/// JSON request body for the backend.
fn build_query_body(query: &ReplyQuery) -> serde_json::Value {
    let mut body = serde_json::json!({
        "message": query.message,
        "language": query.language,
        "history": query.history,
    });
    if let Some(tag) = &query.context_tag {
        body["contextTag"] = serde_json::json!(tag);
    }
    body
}

/// Non-streaming reply shape.
#[derive(Debug, Deserialize)]
struct JsonReply {
    reply: String,
    #[serde(default)]
    intent: Option<BackendIntent>,
}

/// Incremental UTF-8 decoder for byte streams that split multi-byte
/// sequences across chunk boundaries. Bengali is three bytes per code
/// point, so boundaries land mid-character all the time.
///
/// Feed chunks via [`Utf8ChunkDecoder::push`]; each call returns the
/// longest decodable prefix and holds back an incomplete trailing
/// sequence for the next chunk. Genuinely invalid bytes decode to the
/// replacement character rather than stalling the stream.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning the decodable text.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), e.error_len()),
            };
            // The prefix is known valid; lossy conversion borrows it.
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match invalid {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    self.pending.drain(..valid);
                    break;
                }
            }
        }
        out
    }

    /// Flush any held-back bytes at stream end. An incomplete trailing
    /// sequence decodes lossily; it is never going to be finished.
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Utf8ChunkDecoder ──────────────────────────────────────

    #[test]
    fn ascii_passes_straight_through() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"hello "), "hello ");
        assert_eq!(decoder.push(b"world"), "world");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn split_bengali_code_point_is_held_back() {
        // "বল" is e0 a6 ac, e0 a6 b2.
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[0xe0, 0xa6]), "");
        assert_eq!(decoder.push(&[0xac, 0xe0, 0xa6, 0xb2]), "বল");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn split_point_mixed_with_ascii() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[b'a', 0xe0]), "a");
        assert_eq!(decoder.push(&[0xa6, 0xac, b'b']), "বb");
    }

    #[test]
    fn invalid_byte_becomes_replacement_and_stream_continues() {
        let mut decoder = Utf8ChunkDecoder::new();
        let out = decoder.push(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn flush_decodes_incomplete_tail_lossily() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[0xe0, 0xa6]), "");
        assert_eq!(decoder.flush(), "\u{FFFD}");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn empty_push_is_empty() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b""), "");
    }

    // ── request body ──────────────────────────────────────────

    #[test]
    fn query_body_has_message_language_history() {
        let query = ReplyQuery {
            message: "why is the sky blue?".to_owned(),
            language: Language::En,
            history: vec![HistoryTurn {
                role: Role::Assistant,
                content: "Hi!".to_owned(),
            }],
            context_tag: None,
        };
        let body = build_query_body(&query);
        assert_eq!(body["message"], "why is the sky blue?");
        assert_eq!(body["language"], "en");
        assert_eq!(body["history"][0]["role"], "assistant");
        assert_eq!(body["history"][0]["content"], "Hi!");
        assert!(body.get("contextTag").is_none());
    }

    #[test]
    fn context_tag_is_sent_only_when_present() {
        let query = ReplyQuery {
            message: "ok".to_owned(),
            language: Language::Bn,
            history: Vec::new(),
            context_tag: Some("physics".to_owned()),
        };
        let body = build_query_body(&query);
        assert_eq!(body["contextTag"], "physics");
        assert_eq!(body["language"], "bn");
    }

    // ── backend intent wire shape ─────────────────────────────

    #[test]
    fn backend_intent_navigate_parses() {
        let parsed: BackendIntent =
            serde_json::from_str(r#"{"type":"navigate","target":"/physics"}"#)
                .unwrap_or_else(|_| unreachable!("intent parses"));
        assert_eq!(
            parsed,
            BackendIntent::Navigate {
                target: "/physics".to_owned()
            }
        );
    }

    #[test]
    fn backend_intent_answer_parses() {
        let parsed: BackendIntent = serde_json::from_str(r#"{"type":"answer"}"#)
            .unwrap_or_else(|_| unreachable!("intent parses"));
        assert_eq!(parsed, BackendIntent::Answer);
    }

    #[test]
    fn json_reply_intent_is_optional() {
        let parsed: JsonReply = serde_json::from_str(r#"{"reply":"hello"}"#)
            .unwrap_or_else(|_| unreachable!("reply parses"));
        assert_eq!(parsed.reply, "hello");
        assert!(parsed.intent.is_none());
    }
}
