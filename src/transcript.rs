//! Ordered conversation log owned by one chat session.
//!
//! Append-only, except that the last assistant turn is rewritten in place
//! while its reply is being revealed.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai", alias = "assistant")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image_url: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
    attached_image: Option<String>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Replace the content of the trailing assistant turn.
    ///
    /// Leaves the transcript untouched and returns `InvalidState` when the
    /// transcript is empty or ends with a user turn.
    pub fn mutate_last(&mut self, content: &str) -> Result<(), ChatError> {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => {
                turn.content.clear();
                turn.content.push_str(content);
                Ok(())
            }
            Some(_) => Err(ChatError::InvalidState("last turn is not an assistant turn")),
            None => Err(ChatError::InvalidState("transcript is empty")),
        }
    }

    /// Hydrate from server history, dropping any image side state.
    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
        self.attached_image = None;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.attached_image = None;
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn attached_image(&self) -> Option<&str> {
        self.attached_image.as_deref()
    }

    /// Attach an image to the trailing assistant turn and remember it as
    /// the session's current image.
    pub fn attach_image(&mut self, url: String) -> Result<(), ChatError> {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => {
                turn.image_url = Some(url.clone());
                self.attached_image = Some(url);
                Ok(())
            }
            _ => Err(ChatError::InvalidState("no assistant turn to attach an image to")),
        }
    }

    pub fn clear_image(&mut self) {
        self.attached_image = None;
    }
}
