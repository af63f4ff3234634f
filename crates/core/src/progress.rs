//! Learner Progress Tools
//!
//! Exposes the learner's progress record to the generation engine through the
//! Model Context Protocol (MCP). While teaching, the engine can look up the
//! profile, award points, mark topics complete and move the learner to a new
//! level. Every write goes through the [`ProfileStore`] and the refreshed
//! profile is broadcast so the session can recompose its context.

use crate::profile::Profile;
use crate::store::ProfileStore;
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Highest level a subject can be set to.
pub const MAX_LEVEL: u32 = 4;

/// What a progress tool changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressChange {
    PointsAwarded(u32),
    TopicCompleted(String),
    LevelSet { subject: String, level: u32 },
}

/// Broadcast after every successful progress write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub change: ProgressChange,
    /// The profile as stored after the write.
    pub profile: Profile,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct AwardPointsArgs {
    #[schemars(description = "Number of points to award, usually 1 for a correct answer")]
    pub points: u32,
    #[schemars(description = "Short reason, e.g. 'recognized the letter A'")]
    pub reason: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct MarkTopicArgs {
    #[schemars(description = "The mastered topic, e.g. 'Letter A' or 'Counting 1 to 5'")]
    pub topic: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SetLevelArgs {
    #[schemars(description = "Subject tag, e.g. 'literacy' or 'numeracy'")]
    pub subject: String,
    #[schemars(description = "New level from 0 (complete beginner) to 4 (advanced)")]
    pub level: u32,
}

/// MCP tool service bound to one participant.
pub struct ProgressService {
    participant_id: String,
    profiles: Arc<dyn ProfileStore>,
    /// Optional channel for broadcasting progress changes to the session.
    updates: Option<mpsc::Sender<ProgressUpdate>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for ProgressService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Tools for reading and updating the current learner's progress.".to_string(),
            ),
            ..Default::default()
        }
    }
}

#[tool_router]
impl ProgressService {
    pub fn new(
        participant_id: impl Into<String>,
        profiles: Arc<dyn ProfileStore>,
        updates: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            profiles,
            updates,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get the current learner's profile: name, levels, learning path, points and completed topics.")]
    pub async fn get_learner_profile(&self) -> Result<String, String> {
        info!(participant_id = %self.participant_id, "Executing tool 'get_learner_profile'");
        let profile = self.load().await?;
        serde_json::to_string(&profile).map_err(|e| format!("Failed to serialize profile: {e}"))
    }

    #[tool(description = "Award points to the learner for a correct answer or a good effort.")]
    pub async fn award_points(&self, args: Parameters<AwardPointsArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'award_points'");
        let AwardPointsArgs { points, .. } = args.0;
        if points == 0 {
            return Err("Points must be at least 1.".to_string());
        }
        self.profiles
            .add_points(&self.participant_id, points)
            .await
            .map_err(|e| format!("Failed to award points: {e}"))?;
        let profile = self.broadcast(ProgressChange::PointsAwarded(points)).await?;
        Ok(format!("OK. The learner now has {} points.", profile.points))
    }

    #[tool(description = "Mark a topic as mastered once the learner answers it correctly without help.")]
    pub async fn mark_topic_complete(&self, args: Parameters<MarkTopicArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'mark_topic_complete'");
        let topic = args.0.topic.trim().to_string();
        if topic.is_empty() {
            return Err("Topic must not be empty.".to_string());
        }
        self.profiles
            .mark_topic_complete(&self.participant_id, &topic)
            .await
            .map_err(|e| format!("Failed to mark topic complete: {e}"))?;
        let profile = self
            .broadcast(ProgressChange::TopicCompleted(topic.clone()))
            .await?;
        Ok(format!(
            "OK. '{topic}' is complete. {} topics mastered so far.",
            profile.completed_topics.len()
        ))
    }

    #[tool(description = "Move the learner to a subject and level (0-4) once the current level is mastered.")]
    pub async fn set_level(&self, args: Parameters<SetLevelArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'set_level'");
        let SetLevelArgs { subject, level } = args.0;
        let subject = subject.trim().to_lowercase();
        if subject.is_empty() {
            return Err("Subject must not be empty.".to_string());
        }
        if level > MAX_LEVEL {
            return Err(format!("Level must be between 0 and {MAX_LEVEL}, got {level}."));
        }
        self.profiles
            .update_level(&self.participant_id, &subject, level)
            .await
            .map_err(|e| format!("Failed to update level: {e}"))?;
        self.broadcast(ProgressChange::LevelSet {
            subject: subject.clone(),
            level,
        })
        .await?;
        Ok(format!("OK. The learner is now on {subject} level {level}."))
    }
}

impl ProgressService {
    async fn load(&self) -> Result<Profile, String> {
        self.profiles
            .get_profile(&self.participant_id)
            .await
            .map_err(|e| format!("Failed to load profile: {e}"))?
            .ok_or_else(|| format!("No profile for participant '{}'.", self.participant_id))
    }

    async fn broadcast(&self, change: ProgressChange) -> Result<Profile, String> {
        let profile = self.load().await?;
        if let Some(tx) = &self.updates {
            let update = ProgressUpdate {
                change,
                profile: profile.clone(),
            };
            if tx.send(update).await.is_err() {
                warn!("Failed to broadcast progress update: receiver dropped.");
            }
        }
        Ok(profile)
    }
}
