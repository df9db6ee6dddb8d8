//! Engine configuration, loaded from `dialogue.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{DialogueError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| DialogueError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Read `path`, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Where topic content lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Root data directory; topics are read from `<data_dir>/topics`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Watch the topic directory and reload on change
    #[serde(default)]
    pub hot_reload: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            hot_reload: false,
        }
    }
}

/// Conversation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Fixed RNG seed; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Shown when a topic has no resolvable line
    #[serde(default = "default_placeholder_line")]
    pub placeholder_line: String,
    /// Text of the built-in exit response
    #[serde(default = "default_farewell_text")]
    pub farewell_text: String,
    /// Topic used when the NPC has no first topic of its own
    #[serde(default = "default_first_topic")]
    pub first_topic: String,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            seed: None,
            placeholder_line: default_placeholder_line(),
            farewell_text: default_farewell_text(),
            first_topic: default_first_topic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` directive, overridden per target by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_placeholder_line() -> String {
    "...".to_string()
}

fn default_farewell_text() -> String {
    "Bye.".to_string()
}

fn default_first_topic() -> String {
    "TALK_START".to_string()
}

fn default_log_filter() -> String {
    "dialogue_engine=info".to_string()
}
