//! Voice bridge: optional speech input and output.
//!
//! Components:
//! - `command`: external TTS/STT processes (espeak-ng, a recorder script)
//! - `NoVoice`: reports every capability as unsupported
//!
//! The session controller only talks to the `VoiceBridge` trait and checks
//! capabilities before every call.

pub mod command;

use async_trait::async_trait;
use tracing::info;

use crate::config::VoiceConfig;
use crate::error::{Capability, ChatError};

#[async_trait]
pub trait VoiceBridge: Send + Sync {
    fn supports_input(&self) -> bool;

    fn supports_output(&self) -> bool;

    /// Record one utterance and return its transcription.
    async fn listen(&self) -> Result<String, ChatError>;

    /// Speak `text`, interrupting any utterance already playing. Resolves
    /// when playback ends or is cancelled.
    async fn speak(&self, text: &str) -> Result<(), ChatError>;

    /// Stop the current utterance. No-op when silent.
    fn cancel_output(&self);

    fn is_speaking(&self) -> bool;
}

/// Backend for systems without any speech support.
pub struct NoVoice;

#[async_trait]
impl VoiceBridge for NoVoice {
    fn supports_input(&self) -> bool {
        false
    }

    fn supports_output(&self) -> bool {
        false
    }

    async fn listen(&self) -> Result<String, ChatError> {
        Err(ChatError::UnsupportedCapability(Capability::SpeechInput))
    }

    async fn speak(&self, _text: &str) -> Result<(), ChatError> {
        Err(ChatError::UnsupportedCapability(Capability::SpeechOutput))
    }

    fn cancel_output(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Pick a voice backend at startup from config and what is installed.
pub fn select(config: &VoiceConfig) -> Box<dyn VoiceBridge> {
    let voice = command::CommandVoice::from_config(config);
    if voice.supports_input() || voice.supports_output() {
        info!(
            "Voice backend: command (input: {}, output: {})",
            voice.supports_input(),
            voice.supports_output()
        );
        Box::new(voice)
    } else {
        info!("Voice backend: none");
        Box::new(NoVoice)
    }
}
