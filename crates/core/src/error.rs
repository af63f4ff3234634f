use crate::onboarding::OnboardingError;
use thiserror::Error;

/// Failures surfaced by the session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The profile store could not be read at connect. Not retried.
    #[error("failed to look up profile for participant '{participant_id}'")]
    ProfileLookup {
        participant_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("generation engine failed")]
    Generation(#[source] anyhow::Error),

    #[error("pending generation was cancelled")]
    Cancelled,

    #[error("session is not connected")]
    NotConnected,

    #[error("session is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Onboarding(#[from] OnboardingError),
}
