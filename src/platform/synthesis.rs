//! Speech synthesis port and voice selection.

use crate::config::VoiceGender;
use crate::language::Language;
use async_trait::async_trait;

/// One voice advertised by the synthesis platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Platform voice name (e.g. "Samantha").
    pub name: String,
    /// BCP-47 tag the voice speaks (e.g. "bn-BD").
    pub language_tag: String,
    /// Advertised gender, when the platform reports one.
    pub gender: Option<VoiceGender>,
}

/// One utterance queued for synthesis.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Speakable plain text, already markdown-stripped.
    pub text: String,
    /// Language of the utterance.
    pub language: Language,
    /// Voice to use (None = platform default).
    pub voice: Option<VoiceInfo>,
    /// Playback rate multiplier.
    pub rate: f32,
}

/// How a synthesis request finished. Every request finishes; failure is an
/// outcome, not an escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Playback ran to the end.
    Completed,
    /// Playback was cancelled before the end.
    Cancelled,
    /// The platform failed to synthesize or play.
    Failed { reason: String },
}

/// Speech synthesis backend.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Voices currently advertised by the platform. May be empty while the
    /// platform is still enumerating.
    async fn voices(&self) -> Vec<VoiceInfo>;

    /// Speak one utterance to completion. Resolves on finish, cancellation,
    /// or failure; never hangs the caller.
    async fn speak(&self, request: SpeechRequest) -> SynthesisOutcome;

    /// Cancel any in-flight utterance; its `speak` resolves `Cancelled`.
    fn cancel(&self);
}

/// Pick the best available voice for `language`.
///
/// Preference order: caller-ranked names first (in order), then any voice
/// for the language with the preferred gender, then any voice for the
/// language, then `None`, which tells the backend to use its default. The
/// function never fails; a thin voice list just degrades the match.
pub fn select_voice(
    available: &[VoiceInfo],
    preferred_names: &[String],
    language: Language,
    preferred_gender: VoiceGender,
) -> Option<VoiceInfo> {
    for name in preferred_names {
        if let Some(voice) = available.iter().find(|v| &v.name == name) {
            return Some(voice.clone());
        }
    }
    let for_language: Vec<&VoiceInfo> = available
        .iter()
        .filter(|v| speaks(v, language))
        .collect();
    if let Some(voice) = for_language
        .iter()
        .find(|v| v.gender == Some(preferred_gender))
    {
        return Some((*voice).clone());
    }
    for_language.first().map(|v| (*v).clone())
}

/// A voice speaks a language when its tag is the bare language or a
/// regional variant of it ("bn" and "bn-IN" both speak `Bn`).
fn speaks(voice: &VoiceInfo, language: Language) -> bool {
    let tag = language.tag();
    voice.language_tag == tag
        || voice
            .language_tag
            .strip_prefix(tag)
            .is_some_and(|rest| rest.starts_with('-'))
}
