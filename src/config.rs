//! Configuration management for maggie-chat-rs.
//!
//! Loads config from YAML files in standard locations; every section
//! falls back to defaults when absent.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maggiegptbackend-1.onrender.com".into(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub tick_ms: u64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self { tick_ms: 2 }
    }
}

impl RevealConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub input_enabled: bool,
    pub output_enabled: bool,
    /// Read every completed reply aloud.
    pub speak_replies: bool,
    pub lang: String,
    pub tts_command: String,
    /// Command that records one utterance and prints its transcription.
    pub stt_command: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            input_enabled: true,
            output_enabled: true,
            speak_replies: true,
            lang: "en-US".into(),
            tts_command: "espeak-ng -v {lang}".into(),
            stt_command: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_path: String,
}

impl AuthConfig {
    /// Resolved token file, defaulting to ~/.config/maggie-chat/token.
    pub fn token_file(&self) -> PathBuf {
        if self.token_path.is_empty() {
            dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("maggie-chat")
                .join("token")
        } else {
            PathBuf::from(&self.token_path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub reveal: RevealConfig,
    pub voice: VoiceConfig,
    pub auth: AuthConfig,
    pub feedback: FeedbackConfig,
    pub api_server: ApiServerConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/maggie-chat/config.yaml
    /// 3. /etc/maggie-chat/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/maggie-chat/config.yaml")),
                Some(PathBuf::from("/etc/maggie-chat/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
