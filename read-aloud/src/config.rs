// read-aloud configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tts_playback::{ClientSettings, PipelineSettings};

const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
const DEFAULT_VOICE: &str = "af_heart";
const DEFAULT_SPEED: f32 = 1.0;
const DEFAULT_CHUNK_THRESHOLD: usize = 400;
const DEFAULT_MAX_CHUNK_SIZE: usize = 400;
const DEFAULT_PACING_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OUTPUT: &str = "silent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadAloudConfig {
    /// Base URL of the TTS server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Voice id (the first letter selects the language)
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Initial playback speed multiplier
    #[serde(default = "default_speed")]
    pub speed: f32,

    /// Texts longer than this many characters are read in chunks
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Delay between background chunk requests
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Audio output: "silent" or "speaker"
    #[serde(default = "default_output")]
    pub output: String,

    /// Print each chunk's text as it starts playing
    #[serde(default = "default_highlight")]
    pub highlight: bool,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_speed() -> f32 {
    DEFAULT_SPEED
}

fn default_chunk_threshold() -> usize {
    DEFAULT_CHUNK_THRESHOLD
}

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_pacing_ms() -> u64 {
    DEFAULT_PACING_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_highlight() -> bool {
    true
}

impl Default for ReadAloudConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            voice: default_voice(),
            speed: default_speed(),
            chunk_threshold: default_chunk_threshold(),
            max_chunk_size: default_max_chunk_size(),
            pacing_ms: default_pacing_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            output: default_output(),
            highlight: default_highlight(),
        }
    }
}

impl ReadAloudConfig {
    /// Get the config file path: ~/.config/cli-programs/read-aloud.toml
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("cli-programs")
            .join("read-aloud.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: ReadAloudConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn client_settings(&self, server_url: Option<&str>) -> ClientSettings {
        ClientSettings {
            base_url: server_url.unwrap_or(&self.server_url).to_string(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_threshold: self.chunk_threshold,
            max_chunk_size: self.max_chunk_size,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}
