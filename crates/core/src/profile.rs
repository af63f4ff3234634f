//! Learner Profile
//!
//! One record per participant. Created when onboarding completes and updated
//! by progress operations for the rest of the learner's life; never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const LITERACY: &str = "literacy";
pub const NUMERACY: &str = "numeracy";

/// What a participant said about prior schooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchoolHistory {
    Yes,
    No,
    #[default]
    Unknown,
}

impl SchoolHistory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchoolHistory::Yes => "yes",
            SchoolHistory::No => "no",
            SchoolHistory::Unknown => "unknown",
        }
    }

    /// Inverse of [`SchoolHistory::as_str`]; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "yes" => SchoolHistory::Yes,
            "no" => SchoolHistory::No,
            _ => SchoolHistory::Unknown,
        }
    }
}

impl fmt::Display for SchoolHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's persistent learning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Identity key of the participant.
    pub participant_id: String,
    pub name: String,
    pub preferred_language: String,
    /// Level per subject tag, 0 (complete beginner) to 4 (advanced).
    pub levels: BTreeMap<String, u32>,
    pub current_subject: String,
    pub current_level: u32,
    pub learning_goal: String,
    pub motivation: String,
    pub school_history: SchoolHistory,
    /// Ordered subject tags the learner works through.
    pub learning_path: Vec<String>,
    /// Completed topics in the order they were completed, without duplicates.
    pub completed_topics: Vec<String>,
    pub points: u32,
    pub session_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub onboarding_complete: bool,
}

impl Profile {
    /// The recorded level for `subject`, 0 when the subject was never assessed.
    pub fn level_for(&self, subject: &str) -> u32 {
        self.levels.get(subject).copied().unwrap_or(0)
    }

    /// Moves the learner to `subject` at `level` and records the level.
    ///
    /// Returns `true` when the current subject or level actually changed.
    pub fn set_level(&mut self, subject: &str, level: u32) -> bool {
        self.levels.insert(subject.to_string(), level);
        let changed = self.current_subject != subject || self.current_level != level;
        self.current_subject = subject.to_string();
        self.current_level = level;
        changed
    }

    /// Adds `topic` to the completed list unless it is already there.
    pub fn complete_topic(&mut self, topic: &str) -> bool {
        if self.completed_topics.iter().any(|t| t == topic) {
            return false;
        }
        self.completed_topics.push(topic.to_string());
        true
    }

    pub fn add_points(&mut self, count: u32) {
        self.points = self.points.saturating_add(count);
    }

    /// Marks the start of a new session.
    pub fn begin_session(&mut self, now: DateTime<Utc>) {
        self.session_count = self.session_count.saturating_add(1);
        self.last_seen = now;
    }

    /// Whether a connection for this profile can skip straight to teaching.
    pub fn is_returning(&self) -> bool {
        self.onboarding_complete
    }
}
