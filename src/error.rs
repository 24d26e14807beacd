//! Error kinds surfaced by the chat core.

use std::fmt;

use thiserror::Error;

/// Optional platform capability that a voice backend may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SpeechInput,
    SpeechOutput,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpeechInput => write!(f, "speech recognition"),
            Self::SpeechOutput => write!(f, "speech synthesis"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("invalid reply from server: {0}")]
    InvalidReply(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("{0} is not supported on this system")]
    UnsupportedCapability(Capability),

    #[error("speech recognition failed: {0}")]
    SpeechRecognition(String),

    #[error("a reply is already in progress")]
    Busy,

    #[error("not logged in or session expired")]
    Unauthorized,

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Validation(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Failures that only affect the current attempt and are shown as a
    /// transient notice. INVALID_REPLY is reported exactly like a network
    /// failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_) | Self::InvalidReply(_) | Self::SpeechRecognition(_)
        )
    }

    /// Failures worth a desktop notice: transient ones and missing voice
    /// capabilities. Busy and validation errors stay in the terminal.
    pub fn is_notable(&self) -> bool {
        self.is_transient() || matches!(self, Self::UnsupportedCapability(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidReply(e.to_string())
        } else if e.is_timeout() {
            Self::NetworkFailure("request timed out".into())
        } else if e.is_connect() {
            Self::NetworkFailure("cannot connect to server".into())
        } else {
            Self::NetworkFailure(e.to_string())
        }
    }
}
