//! Conversation-level types shared between the orchestrator, the generation
//! engine adapters and the transport layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// An instruction from the orchestrator to the generation engine.
    System,
    /// Recognized speech from the participant.
    User,
    /// Generated teaching text, after directive removal.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The conversational mode of a resolved connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Onboarding,
    Teaching,
}

/// Discrete events an orchestrator reacts to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The participant's connection is established.
    Connect,
    /// Final recognized speech from the participant.
    UserSpeech(String),
    /// Text produced by the generation engine outside of a request the
    /// orchestrator made itself (e.g. pushed by a streaming engine).
    GeneratedText(String),
    /// The connection is gone.
    Disconnect,
}
