//! Configuration types for the voice engine.

use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the voice engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Active conversation language.
    pub language: Language,
    /// Continuous speech capture settings.
    pub recognition: RecognitionConfig,
    /// Transcript submission gate settings.
    pub gate: GateConfig,
    /// Reply backend settings.
    pub reply: ReplyConfig,
    /// Speech synthesis settings.
    pub voice: VoiceConfig,
    /// Session log / mode flag persistence settings.
    pub store: StoreConfig,
}

/// Continuous speech capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Delay in ms before recreating a capture session after it ends
    /// or fails with a retryable error.
    pub restart_backoff_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            restart_backoff_ms: 150,
        }
    }
}

/// Transcript submission gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Window in ms after an accepted submission during which further
    /// finalized transcripts are dropped.
    pub submit_lock_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            submit_lock_ms: 300,
        }
    }
}

/// Reply backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Query endpoint URL. Empty means no backend is configured and every
    /// submission resolves to the fixed apology without a request.
    pub endpoint: String,
    /// Bearer token sent with each request. Empty disables requests the
    /// same way an empty endpoint does.
    pub api_key: String,
    /// How many recent turns accompany each query as rolling context.
    pub history_turns: usize,
    /// Whole-request timeout in ms, including streaming the body.
    pub timeout_ms: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            history_turns: 4,
            timeout_ms: 30_000,
        }
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Voice names tried first, in order, when speaking English.
    pub preferred_en: Vec<String>,
    /// Voice names tried first, in order, when speaking Bengali.
    pub preferred_bn: Vec<String>,
    /// Gender preferred when no named voice matches.
    pub preferred_gender: VoiceGender,
    /// Playback rate multiplier (1.0 = the voice's natural rate).
    pub rate: f32,
    /// Delay in ms between playback completion and capture resuming,
    /// so the microphone does not pick up the speaker's tail.
    pub resume_delay_ms: u64,
}

impl VoiceConfig {
    /// Ranked voice names to try first for `language`.
    pub fn preferred_names(&self, language: Language) -> &[String] {
        match language {
            Language::En => &self.preferred_en,
            Language::Bn => &self.preferred_bn,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            preferred_en: vec!["Samantha".to_owned(), "Google US English".to_owned()],
            preferred_bn: vec!["Google বাংলা".to_owned()],
            preferred_gender: VoiceGender::Female,
            rate: 1.0,
            resume_delay_ms: 400,
        }
    }
}

/// Synthesis voice gender, as advertised by the platform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    /// Female voice.
    #[default]
    Female,
    /// Male voice.
    Male,
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding persisted state (None = platform data dir).
    pub root_dir: Option<PathBuf>,
    /// Prefix namespacing every persisted key.
    pub namespace: String,
    /// Most recent turns kept when persisting the session log.
    pub turn_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            namespace: "kotha".to_owned(),
            turn_cap: 200,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/kotha/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("kotha").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("kotha")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/kotha-config/config.toml")
        }
    }
}
