//! Output Pipeline
//!
//! Every piece of generated text passes through here before it is spoken:
//! directives are extracted, then each registered stage sees the cleaned turn
//! in registration order. Stages never block the speech path; a failing stage
//! is logged and the rest still run.

use crate::channel::DirectiveChannel;
use crate::directive::{self, Extraction};
use crate::tracker::SessionTracker;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One assistant turn after directive extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantTurn {
    pub session_id: String,
    /// The participant utterance this turn answers, if any.
    pub user_text: Option<String>,
    pub clean_text: String,
    pub keys: Vec<String>,
}

/// A consumer of cleaned assistant turns.
#[async_trait]
pub trait OutputStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_assistant_turn(&self, turn: &AssistantTurn) -> Result<()>;
}

#[derive(Default)]
pub struct OutputPipeline {
    stages: Vec<Arc<dyn OutputStage>>,
}

impl OutputPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn OutputStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Extracts directives from `text` and feeds the result to every stage.
    pub async fn process(
        &self,
        session_id: &str,
        user_text: Option<&str>,
        text: &str,
    ) -> AssistantTurn {
        let Extraction { clean_text, keys } = directive::extract(text);
        if !keys.is_empty() {
            debug!(%session_id, ?keys, "Extracted display directives");
        }
        let turn = AssistantTurn {
            session_id: session_id.to_string(),
            user_text: user_text.map(str::to_string),
            clean_text,
            keys,
        };
        for stage in &self.stages {
            if let Err(e) = stage.on_assistant_turn(&turn).await {
                warn!(stage = stage.name(), error = ?e, "Output stage failed");
            }
        }
        turn
    }
}

/// Forwards every directive key to the session's display endpoint.
pub struct DisplayStage {
    channel: DirectiveChannel,
}

impl DisplayStage {
    pub fn new(channel: DirectiveChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl OutputStage for DisplayStage {
    fn name(&self) -> &'static str {
        "display"
    }

    async fn on_assistant_turn(&self, turn: &AssistantTurn) -> Result<()> {
        for key in &turn.keys {
            self.channel.send_show(&turn.session_id, key).await;
        }
        Ok(())
    }
}

/// Records visuals and exchanges into the session tracker.
pub struct TrackerStage {
    tracker: Arc<Mutex<SessionTracker>>,
}

impl TrackerStage {
    pub fn new(tracker: Arc<Mutex<SessionTracker>>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl OutputStage for TrackerStage {
    fn name(&self) -> &'static str {
        "session_tracker"
    }

    async fn on_assistant_turn(&self, turn: &AssistantTurn) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        for key in directive::dedup_keys(&turn.keys) {
            tracker.record_visual(&key);
        }
        tracker.record_exchange(
            turn.user_text.as_deref().unwrap_or_default(),
            &turn.clean_text,
            Utc::now(),
        );
        Ok(())
    }
}
