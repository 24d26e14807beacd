//! Voice backend built on external commands.
//!
//! Output runs `tts_command <text>` (e.g. espeak-ng) once per utterance and
//! kills it on cancel. Input runs `stt_command`, which is expected to record
//! one utterance and print the transcription on stdout. `{lang}` in either
//! command is replaced with the configured language.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::VoiceBridge;
use crate::config::VoiceConfig;
use crate::error::{Capability, ChatError};

/// Program plus leading arguments, parsed from a config string.
#[derive(Debug, Clone)]
struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    fn parse(raw: &str, lang: &str) -> Option<Self> {
        let lang = lang.to_lowercase();
        let mut parts = raw.split_whitespace().map(|p| p.replace("{lang}", &lang));
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

pub struct CommandVoice {
    tts: Option<CommandLine>,
    stt: Option<CommandLine>,
    next_utterance: AtomicU64,
    current: Mutex<Option<(u64, CancellationToken)>>,
}

impl CommandVoice {
    /// Build from config, keeping only the commands that are enabled and
    /// present on PATH.
    pub fn from_config(config: &VoiceConfig) -> Self {
        let probe = |enabled: bool, raw: &str, what: &str| {
            if !enabled {
                return None;
            }
            let line = CommandLine::parse(raw, &config.lang)?;
            if find_in_path(&line.program).is_none() {
                warn!("{what} command '{}' not found on PATH", line.program);
                return None;
            }
            Some(line)
        };

        Self {
            tts: probe(config.output_enabled, &config.tts_command, "TTS"),
            stt: probe(config.input_enabled, &config.stt_command, "STT"),
            next_utterance: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    fn finish(&self, id: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|(cur, _)| *cur == id) {
            *current = None;
        }
    }
}

#[async_trait]
impl VoiceBridge for CommandVoice {
    fn supports_input(&self) -> bool {
        self.stt.is_some()
    }

    fn supports_output(&self) -> bool {
        self.tts.is_some()
    }

    async fn listen(&self) -> Result<String, ChatError> {
        let stt = self
            .stt
            .as_ref()
            .ok_or(ChatError::UnsupportedCapability(Capability::SpeechInput))?;

        info!("Listening via {}", stt.program);
        let output = stt
            .command()
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            warn!("STT command exited with {}", output.status);
            return Err(ChatError::SpeechRecognition(format!(
                "command exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ChatError::SpeechRecognition("no speech was recognized".into()));
        }
        debug!("Recognized: '{text}'");
        Ok(text)
    }

    async fn speak(&self, text: &str) -> Result<(), ChatError> {
        let tts = self
            .tts
            .as_ref()
            .ok_or(ChatError::UnsupportedCapability(Capability::SpeechOutput))?;

        let id = self.next_utterance.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((prev, prev_token)) = current.replace((id, token.clone())) {
                debug!("Utterance {prev} interrupted by {id}");
                prev_token.cancel();
            }
        }

        let mut child = match tts
            .command()
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.finish(id);
                return Err(e.into());
            }
        };

        let result: Result<(), ChatError> = tokio::select! {
            _ = token.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop TTS process: {e}");
                }
                info!("Utterance {id} cancelled");
                Ok(())
            }
            status = child.wait() => match status {
                Ok(s) if !s.success() => {
                    warn!("TTS command exited with {s}");
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            },
        };

        self.finish(id);
        result
    }

    fn cancel_output(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, token)) = current {
            token.cancel();
        }
    }

    fn is_speaking(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Locate an executable the way a shell would.
fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
