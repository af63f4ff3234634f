//! Session Orchestrator
//!
//! Owns one participant connection from connect to disconnect. On connect it
//! decides between the onboarding interview and teaching, keeps the
//! instructional context handed to the generation engine current, routes
//! generated text through the output pipeline and, at disconnect, saves what
//! was taught so the next session can resume from it.
//!
//! ```text
//! Disconnected -> Connecting -> Onboarding -> Teaching -> Disconnected
//!                           \-> Teaching ----------------/
//! ```

use crate::channel::DirectiveChannel;
use crate::conversation::{Mode, SessionEvent, Turn};
use crate::curriculum::CurriculumProvider;
use crate::error::SessionError;
use crate::llm_client::GenerationEngine;
use crate::onboarding::{self, OnboardingAnswers, OnboardingFlow, OnboardingStep, Question};
use crate::pipeline::{DisplayStage, OutputPipeline, TrackerStage};
use crate::profile::Profile;
use crate::progress::ProgressUpdate;
use crate::prompt;
use crate::store::{ProfileStore, SummaryStore, with_retry};
use crate::tracker::{self, SessionTracker};
use crate::Command;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Onboarding,
    Teaching,
}

impl SessionState {
    pub fn mode(self) -> Option<Mode> {
        match self {
            SessionState::Onboarding => Some(Mode::Onboarding),
            SessionState::Teaching => Some(Mode::Teaching),
            SessionState::Disconnected | SessionState::Connecting => None,
        }
    }
}

/// The process-wide collaborators every orchestrator is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub curriculum: Arc<dyn CurriculumProvider>,
    pub engine: Arc<dyn GenerationEngine>,
    pub channel: DirectiveChannel,
}

pub struct SessionOrchestrator {
    session_id: String,
    participant_id: String,
    state: SessionState,
    deps: Collaborators,
    cancel: CancellationToken,
    context: String,
    history: Vec<Turn>,
    onboarding: Option<OnboardingFlow>,
    profile: Option<Profile>,
    last_summary: Option<String>,
    /// Present once teaching starts; onboarding turns are never tracked.
    tracker: Option<Arc<Mutex<SessionTracker>>>,
    connected_at: DateTime<Utc>,
    pipeline: OutputPipeline,
    pending_user_text: Option<String>,
}

impl SessionOrchestrator {
    pub fn new(
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        deps: Collaborators,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            state: SessionState::Disconnected,
            deps,
            cancel: CancellationToken::new(),
            context: String::new(),
            history: Vec::new(),
            onboarding: None,
            profile: None,
            last_summary: None,
            tracker: None,
            connected_at: Utc::now(),
            pipeline: OutputPipeline::new(),
            pending_user_text: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Option<Mode> {
        self.state.mode()
    }

    /// The instructional context currently handed to the engine.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// The onboarding interview, while one is running.
    pub fn onboarding(&self) -> Option<&OnboardingFlow> {
        self.onboarding.as_ref()
    }

    /// A handle that aborts pending generation when cancelled. Cancelling it
    /// ends the session's ability to generate for good.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn tracker_snapshot(&self) -> Option<SessionTracker> {
        match &self.tracker {
            Some(tracker) => Some(tracker.lock().await.clone()),
            None => None,
        }
    }

    /// Dispatches a discrete session event.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<Vec<Command>, SessionError> {
        match event {
            SessionEvent::Connect => self.connect().await,
            SessionEvent::UserSpeech(text) => self.handle_user_text(&text).await,
            SessionEvent::GeneratedText(text) => self.handle_generated_text(&text).await,
            SessionEvent::Disconnect => Ok(self.disconnect().await),
        }
    }

    /// Resolves the participant and opens the conversation.
    pub async fn connect(&mut self) -> Result<Vec<Command>, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.state = SessionState::Connecting;
        info!(session_id = %self.session_id, participant_id = %self.participant_id, "Session connecting");

        let profile = match self.deps.profiles.get_profile(&self.participant_id).await {
            Ok(profile) => profile,
            Err(source) => {
                self.state = SessionState::Disconnected;
                return Err(SessionError::ProfileLookup {
                    participant_id: self.participant_id.clone(),
                    source,
                });
            }
        };

        self.connected_at = Utc::now();
        self.tracker = None;
        self.pipeline = OutputPipeline::new()
            .with_stage(Arc::new(DisplayStage::new(self.deps.channel.clone())));

        let result = match profile {
            Some(profile) if profile.is_returning() => self.start_teaching(profile).await,
            _ => self.start_onboarding().await,
        };
        if result.is_err() && self.state == SessionState::Connecting {
            self.state = SessionState::Disconnected;
        }
        result
    }

    /// Feeds one final participant utterance into the session.
    pub async fn handle_user_text(&mut self, text: &str) -> Result<Vec<Command>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        match self.state {
            SessionState::Onboarding => {
                self.push_user_turn(text);
                let flow = self.onboarding.as_mut().ok_or(SessionError::NotConnected)?;
                match flow.record_answer(text)? {
                    OnboardingStep::Continue(next) => {
                        let name = flow.answers().name.clone();
                        let instruction = prompt::ask_question_instruction(next, name.as_deref());
                        self.respond(Some(instruction)).await
                    }
                    OnboardingStep::Complete(answers) => {
                        let (instruction, mut commands) = self.enter_teaching(answers).await;
                        commands.extend(self.respond(Some(instruction)).await?);
                        Ok(commands)
                    }
                }
            }
            SessionState::Teaching => {
                self.push_user_turn(text);
                self.respond(None).await
            }
            SessionState::Disconnected | SessionState::Connecting => Err(SessionError::NotConnected),
        }
    }

    /// Handles text the engine produced on its own initiative.
    pub async fn handle_generated_text(&mut self, text: &str) -> Result<Vec<Command>, SessionError> {
        if self.state.mode().is_none() {
            return Err(SessionError::NotConnected);
        }
        let (mut commands, completed) = self.speak(text).await;
        if completed && self.state == SessionState::Onboarding {
            let answers = self.finish_onboarding_early()?;
            let (instruction, transition) = self.enter_teaching(answers).await;
            commands.extend(transition);
            commands.extend(self.respond(Some(instruction)).await?);
        }
        Ok(commands)
    }

    /// Refreshes the profile after a progress tool wrote to the store.
    ///
    /// Returns `true` when the context was recomposed.
    pub async fn apply_progress(&mut self, update: ProgressUpdate) -> bool {
        if self.state != SessionState::Teaching
            || update.profile.participant_id != self.participant_id
        {
            return false;
        }
        let moved = self.profile.as_ref().is_none_or(|current| {
            current.current_subject != update.profile.current_subject
                || current.current_level != update.profile.current_level
        });
        let profile = update.profile;
        if moved {
            info!(
                subject = %profile.current_subject,
                level = profile.current_level,
                "Learner moved, recomposing context"
            );
            self.context = self.compose_for(&profile).await;
        }
        self.profile = Some(profile);
        moved
    }

    /// Ends the session. Safe to call more than once.
    pub async fn disconnect(&mut self) -> Vec<Command> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }
        self.cancel.cancel();
        let was = self.state;
        let mut commands = Vec::new();

        if was == SessionState::Teaching {
            if let Some(tracker) = &self.tracker {
                let tracker = tracker.lock().await.clone();
                let store = self.deps.summaries.as_ref();
                let tracker = &tracker;
                match with_retry("save_summary", move || tracker.save(store)).await {
                    Ok(summary) => commands.push(Command::SessionComplete(summary.summary)),
                    Err(e) => error!(
                        session_id = %self.session_id,
                        error = ?e,
                        "Dropping session summary after retry"
                    ),
                }
            }
        }

        self.deps.channel.send_hide(&self.session_id).await;
        self.deps.channel.unregister(&self.session_id).await;
        self.state = SessionState::Disconnected;
        self.onboarding = None;
        self.pending_user_text = None;
        info!(session_id = %self.session_id, from = ?was, "Session disconnected");
        commands
    }

    async fn start_onboarding(&mut self) -> Result<Vec<Command>, SessionError> {
        info!(participant_id = %self.participant_id, "Starting onboarding interview");
        self.onboarding = Some(OnboardingFlow::new());
        self.context = prompt::onboarding_context();
        self.state = SessionState::Onboarding;
        self.respond(Some(prompt::ask_question_instruction(Question::Name, None)))
            .await
    }

    async fn start_teaching(&mut self, mut profile: Profile) -> Result<Vec<Command>, SessionError> {
        let now = Utc::now();
        let profiles = self.deps.profiles.as_ref();
        let participant_id = self.participant_id.as_str();
        if let Err(e) = with_retry("record_session_start", move || {
            profiles.record_session_start(participant_id, now)
        })
        .await
        {
            error!(%participant_id, error = ?e, "Failed to record session start");
        }
        profile.begin_session(now);

        self.last_summary = match tracker::load_last_summary(
            self.deps.summaries.as_ref(),
            &self.participant_id,
        )
        .await
        {
            Ok(summary) => summary.map(|s| s.summary),
            Err(e) => {
                warn!(error = ?e, "Failed to load last session summary, starting fresh");
                None
            }
        };

        self.context = self.compose_for(&profile).await;
        let instruction = prompt::resume_instruction(&profile.name);
        info!(
            name = %profile.name,
            subject = %profile.current_subject,
            level = profile.current_level,
            resumed = self.last_summary.is_some(),
            "Returning learner, starting teaching"
        );
        self.profile = Some(profile);
        self.state = SessionState::Teaching;
        self.start_tracking();
        self.respond(Some(instruction)).await
    }

    /// Builds and stores the profile, then switches the context to teaching.
    ///
    /// Returns the transition instruction and the commands announcing it.
    async fn enter_teaching(&mut self, answers: OnboardingAnswers) -> (String, Vec<Command>) {
        let profile = onboarding::build_profile(&self.participant_id, &answers, Utc::now());
        let profiles = self.deps.profiles.as_ref();
        let record = &profile;
        if let Err(e) = with_retry("save_profile", move || profiles.save_profile(record)).await {
            error!(
                participant_id = %self.participant_id,
                error = ?e,
                "Failed to persist new profile, continuing without it"
            );
        }

        self.last_summary = None;
        self.context = self.compose_for(&profile).await;
        self.onboarding = None;
        self.state = SessionState::Teaching;
        self.start_tracking();
        info!(name = %profile.name, "Onboarding complete, switching to teaching");

        let name = profile.name.clone();
        self.profile = Some(profile);
        (
            prompt::teaching_transition_instruction(&name),
            vec![Command::EnterTeaching(name)],
        )
    }

    /// Attaches a fresh tracker behind the display stage.
    fn start_tracking(&mut self) {
        let tracker = Arc::new(Mutex::new(SessionTracker::new(
            &self.session_id,
            &self.participant_id,
            self.connected_at,
        )));
        self.pipeline = OutputPipeline::new()
            .with_stage(Arc::new(DisplayStage::new(self.deps.channel.clone())))
            .with_stage(Arc::new(TrackerStage::new(tracker.clone())));
        self.tracker = Some(tracker);
    }

    fn finish_onboarding_early(&mut self) -> Result<OnboardingAnswers, SessionError> {
        let flow = self.onboarding.as_mut().ok_or(SessionError::NotConnected)?;
        Ok(flow.complete_early()?)
    }

    async fn compose_for(&self, profile: &Profile) -> String {
        let curriculum = self
            .deps
            .curriculum
            .resolve(&profile.current_subject, profile.current_level)
            .await;
        prompt::compose(profile, &curriculum, self.last_summary.as_deref())
    }

    fn push_user_turn(&mut self, text: &str) {
        self.history.push(Turn::user(text));
        self.pending_user_text = Some(text.to_string());
    }

    /// Optionally issues an instruction, then generates and speaks.
    ///
    /// A completion marker produced during onboarding finishes the
    /// interview and generates once more for the transition.
    async fn respond(&mut self, instruction: Option<String>) -> Result<Vec<Command>, SessionError> {
        let mut commands = Vec::new();
        let mut instruction = instruction;
        loop {
            if let Some(text) = instruction.take() {
                self.history.push(Turn::system(text));
            }
            let generated = self.generate().await?;
            let (spoken, completed) = self.speak(&generated).await;
            commands.extend(spoken);
            if !(completed && self.state == SessionState::Onboarding) {
                return Ok(commands);
            }
            let answers = self.finish_onboarding_early()?;
            let (transition, announced) = self.enter_teaching(answers).await;
            commands.extend(announced);
            instruction = Some(transition);
        }
    }

    async fn generate(&self) -> Result<String, SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.deps.engine.generate(&self.context, &self.history) => {
                result.map_err(SessionError::Generation)
            }
        }
    }

    /// Runs generated text through the output pipeline.
    ///
    /// Returns the commands to execute and whether the text carried the
    /// onboarding completion marker.
    async fn speak(&mut self, text: &str) -> (Vec<Command>, bool) {
        let (text, completed) = onboarding::take_completion_marker(text);
        let user_text = self.pending_user_text.take();
        let turn = self
            .pipeline
            .process(&self.session_id, user_text.as_deref(), &text)
            .await;

        let mut commands = Vec::new();
        if !turn.clean_text.is_empty() {
            self.history.push(Turn::assistant(turn.clean_text.clone()));
            commands.push(Command::SpeakText(turn.clean_text));
        }
        (commands, completed)
    }
}
