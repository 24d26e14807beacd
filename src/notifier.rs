//! Desktop notices via notify-rust (D-Bus) for session errors, so failed
//! requests and missing voice support are visible even when the terminal is
//! in the background.

use notify_rust::{Notification, Timeout};
use tracing::{debug, warn};

use crate::error::{Capability, ChatError};

const APP_NAME: &str = "MaggieGPT";

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Show `err` on the desktop if it is one the user should see there.
    pub fn notify_error(&self, err: &ChatError) {
        if !self.enabled || !err.is_notable() {
            return;
        }

        let (summary, icon) = describe(err);
        debug!("Desktop notice: {summary}: {err}");

        if let Err(e) = Notification::new()
            .appname(APP_NAME)
            .summary(summary)
            .body(&err.to_string())
            .icon(icon)
            .timeout(Timeout::Milliseconds(4000))
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}

/// Summary line and freedesktop icon name for a notable error.
fn describe(err: &ChatError) -> (&'static str, &'static str) {
    match err {
        ChatError::UnsupportedCapability(Capability::SpeechInput) => {
            ("Voice input unavailable", "audio-input-microphone")
        }
        ChatError::UnsupportedCapability(Capability::SpeechOutput) => {
            ("Voice output unavailable", "audio-speakers")
        }
        ChatError::SpeechRecognition(_) => ("Didn't catch that", "audio-input-microphone"),
        _ => ("MaggieGPT is unreachable", "network-error"),
    }
}
