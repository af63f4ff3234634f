//! API Models
//!
//! Request and response bodies of the REST API, with `utoipa` schemas for the
//! OpenAPI documentation. Core records are converted into these views at the
//! handler boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;
use vidya_core::{profile::Profile, tracker::SessionSummary};

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "openai")]
    pub provider: String,
    #[schema(example = "gpt-4o")]
    pub model: String,
    /// Subjects found in the curriculum directory.
    pub curriculum_subjects: Vec<String>,
    /// Display endpoints currently connected.
    pub active_displays: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct StartSessionResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub participant_id: String,
    /// Whether the participant already finished onboarding.
    pub returning: bool,
    #[schema(example = "/ws/session")]
    pub session_ws: String,
    #[schema(example = "/ws/visual/5f0c8a52-3c1e-4e0b-9d47-7b1c2f8f9a10")]
    pub visual_ws: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub participant_id: String,
    #[schema(example = "Asha")]
    pub name: String,
    #[schema(example = "Hindi")]
    pub preferred_language: String,
    pub levels: BTreeMap<String, u32>,
    #[schema(example = "literacy")]
    pub current_subject: String,
    pub current_level: u32,
    pub learning_goal: String,
    pub motivation: String,
    #[schema(example = "no")]
    pub school_history: String,
    pub learning_path: Vec<String>,
    pub completed_topics: Vec<String>,
    pub points: u32,
    pub session_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub onboarding_complete: bool,
}

impl From<Profile> for ProfileView {
    fn from(p: Profile) -> Self {
        Self {
            participant_id: p.participant_id,
            name: p.name,
            preferred_language: p.preferred_language,
            levels: p.levels,
            current_subject: p.current_subject,
            current_level: p.current_level,
            learning_goal: p.learning_goal,
            motivation: p.motivation,
            school_history: p.school_history.to_string(),
            learning_path: p.learning_path,
            completed_topics: p.completed_topics,
            points: p.points,
            session_count: p.session_count,
            created_at: p.created_at,
            last_seen: p.last_seen,
            onboarding_complete: p.onboarding_complete,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SummaryView {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub concepts_taught: Vec<String>,
    pub visuals_shown: Vec<String>,
    pub successes: u32,
    pub exchanges: u32,
    pub struggles: Vec<String>,
    /// Synopsis the next session opens with.
    pub summary: String,
}

impl From<SessionSummary> for SummaryView {
    fn from(s: SessionSummary) -> Self {
        Self {
            session_id: s.session_id,
            started_at: s.started_at,
            ended_at: s.ended_at,
            concepts_taught: s.concepts_taught,
            visuals_shown: s.visuals_shown,
            successes: s.successes,
            exchanges: s.exchanges,
            struggles: s.struggles,
            summary: s.summary,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vidya_core::profile::SchoolHistory;

    #[test]
    fn test_profile_view_from_profile() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let profile = Profile {
            participant_id: "learner-1".into(),
            name: "Asha".into(),
            preferred_language: "Hindi".into(),
            levels: BTreeMap::from([("literacy".to_string(), 1)]),
            current_subject: "literacy".into(),
            current_level: 1,
            learning_goal: "read".into(),
            motivation: "family".into(),
            school_history: SchoolHistory::No,
            learning_path: vec!["literacy".into()],
            completed_topics: vec![],
            points: 4,
            session_count: 3,
            created_at: at,
            last_seen: at,
            onboarding_complete: true,
        };
        let view = ProfileView::from(profile);
        assert_eq!(view.school_history, "no");
        assert_eq!(view.points, 4);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["levels"]["literacy"], 1);
        assert_eq!(json["onboarding_complete"], true);
    }

    #[test]
    fn test_start_session_response_serialization() {
        let session_id = Uuid::new_v4();
        let response = StartSessionResponse {
            session_id,
            participant_id: "learner-1".into(),
            returning: false,
            session_ws: "/ws/session".into(),
            visual_ws: format!("/ws/visual/{session_id}"),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(&session_id.to_string()));
        let back: StartSessionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }
}
