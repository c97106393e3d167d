//! Namespaced JSON persistence for session state.
//!
//! Each piece of state lives under its own key as
//! `{root}/{namespace}.{key}.json`. Writes are atomic (temp file + fsync +
//! rename) so a crash mid-write never leaves a half-serialized log behind.
//! Reads never fail the engine: absent or unreadable state falls back to a
//! seeded default.

use crate::config::StoreConfig;
use crate::error::{EngineError, Result};
use crate::language::Language;
use crate::session::messages::Turn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Key holding the ordered session log.
pub const TURNS_KEY: &str = "turns";
/// Key holding the continuous voice capture flag.
pub const VOICE_INPUT_KEY: &str = "voice-input";
/// Key holding the spoken replies flag.
pub const VOICE_OUTPUT_KEY: &str = "voice-output";

/// File-backed store for the session log and mode flags.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    namespace: String,
    turn_cap: usize,
}

impl StateStore {
    /// Open (and create if needed) the state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let root = config.root_dir.clone().unwrap_or_else(default_root);
        std::fs::create_dir_all(&root).map_err(|e| {
            EngineError::Storage(format!(
                "failed to create state directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            namespace: config.namespace.clone(),
            turn_cap: config.turn_cap,
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{key}.json", self.namespace))
    }

    /// Load a value under a namespaced key. Absent or unreadable state is
    /// `None`, never an error.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.key_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no persisted state for {key}");
                return None;
            }
            Err(e) => {
                warn!("failed to read persisted state for {key}: {e}");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("persisted state for {key} is corrupt, ignoring: {e}");
                None
            }
        }
    }

    /// Atomically write a value under a namespaced key.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| EngineError::Storage(format!("failed to serialize {key}: {e}")))?;

        // Write to a temp file in the same directory (for atomic rename)
        let tmp_path = self.root.join(format!(".{}.{key}.tmp", self.namespace));
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| {
            EngineError::Storage(format!(
                "failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;

        // fsync the file
        if let Ok(file) = std::fs::File::open(&tmp_path) {
            let _ = file.sync_all();
        }

        // Atomic rename
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            EngineError::Storage(format!(
                "failed to rename temp file to {}: {e}",
                path.display()
            ))
        })?;

        Ok(())
    }

    /// Session log, seeded with a greeting in `language` when nothing
    /// usable is persisted.
    pub fn load_turns(&self, language: Language) -> Vec<Turn> {
        match self.load::<Vec<Turn>>(TURNS_KEY) {
            Some(turns) if !turns.is_empty() => turns,
            _ => vec![Turn::assistant(language.greeting())],
        }
    }

    /// Persist the session log, keeping only the newest `turn_cap` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_turns(&self, turns: &[Turn]) -> Result<()> {
        let start = turns.len().saturating_sub(self.turn_cap);
        self.save(TURNS_KEY, &&turns[start..])
    }

    /// Mode flag, falling back to `default` when nothing usable is persisted.
    pub fn load_flag(&self, key: &str, default: bool) -> bool {
        self.load::<bool>(key).unwrap_or(default)
    }

    /// Best-effort flag write; failures are logged, never propagated.
    pub fn save_flag(&self, key: &str, value: bool) {
        if let Err(e) = self.save(key, &value) {
            warn!("failed to persist {key}: {e}");
        }
    }
}

/// Platform data directory for the engine's state files.
fn default_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("kotha"))
        .unwrap_or_else(|| std::env::temp_dir().join("kotha"))
}
