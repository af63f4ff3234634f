//! Defines the WebSocket message protocol between the session client and the API server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vidya_core::conversation::Mode;

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Opens the session. This must be the first message.
    #[serde(rename = "init")]
    Init {
        /// The participant the session belongs to.
        participant_id: String,
        /// The id allocated by `POST /api/session/start`; a fresh one is used when absent.
        session_id: Option<Uuid>,
    },
    /// A final recognized utterance from the participant.
    #[serde(rename = "user_message")]
    UserMessage { text: String },
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the participant was resolved and reports the opening mode.
    Initialized {
        session_id: Uuid,
        participant_id: String,
        mode: Mode,
    },
    /// Text for the participant to hear, with directive markers removed.
    AssistantText { text: String },
    /// Onboarding finished and the session now teaches `name`.
    ModeChanged { mode: Mode, name: String },
    /// The session summary was saved.
    SessionComplete { summary: String },
    /// Reports an error to the client.
    Error { message: String },
}
