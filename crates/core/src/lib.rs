pub mod channel;
pub mod conversation;
pub mod curriculum;
pub mod directive;
pub mod error;
pub mod llm_client;
pub mod onboarding;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod prompt;
pub mod store;
pub mod tracker;

/// Represents commands that the core logic issues to an external runtime.
///
/// This enum is the primary API for decoupling the orchestrator's
/// decision-making from the runtime's execution of side effects (like
/// speaking text or announcing a mode change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Command the runtime to speak the given text to the participant.
    SpeakText(String),
    /// Onboarding finished; the session now teaches the named participant.
    EnterTeaching(String),
    /// The session ended, with the synopsis saved for next time.
    SessionComplete(String),
}
