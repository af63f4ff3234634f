//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for session start
//! and learner records. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use vidya_core::store::{ProfileStore, SummaryStore};

use crate::{
    config::Provider,
    models::{ErrorResponse, HealthResponse, ProfileView, StartSessionResponse, SummaryView},
    state::AppState,
};

/// Header carrying the participant identity.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// The participant id from the request headers, or a fresh one.
fn participant_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    match headers.get(PARTICIPANT_HEADER) {
        None => Ok(Uuid::new_v4().to_string()),
        Some(value) => {
            let id = value
                .to_str()
                .map_err(|_| ApiError::BadRequest(format!("{PARTICIPANT_HEADER} is not valid text")))?
                .trim();
            if id.is_empty() {
                Err(ApiError::BadRequest(format!("{PARTICIPANT_HEADER} must not be empty")))
            } else {
                Ok(id.to_string())
            }
        }
    }
}

/// Report service health and configuration state.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let provider = match state.config.provider {
        Provider::OpenAI => "openai",
        Provider::Gemini => "gemini",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        provider: provider.to_string(),
        model: state.config.chat_model.clone(),
        curriculum_subjects: state.curriculum.list_subjects().await,
        active_displays: state.channel.len().await,
    })
}

/// Start a tutoring session for a participant.
#[utoipa::path(
    post,
    path = "/api/session/start",
    responses(
        (status = 201, description = "Session allocated", body = StartSessionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-participant-id" = Option<String>, Header, description = "The participant's id; a new one is issued when absent")
    )
)]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let participant_id = participant_from_headers(&headers)?;
    let returning = state
        .db
        .get_profile(&participant_id)
        .await?
        .is_some_and(|p| p.is_returning());
    let session_id = Uuid::new_v4();
    info!(%session_id, %participant_id, returning, "Session allocated");

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id,
            participant_id,
            returning,
            session_ws: "/ws/session".to_string(),
            visual_ws: format!("/ws/visual/{session_id}"),
        }),
    ))
}

/// Get a participant's learner profile.
#[utoipa::path(
    get,
    path = "/api/profiles/{id}",
    responses(
        (status = 200, description = "Learner profile", body = ProfileView),
        (status = 404, description = "Profile not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Participant id")
    )
)]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<String>,
) -> Result<Json<ProfileView>, ApiError> {
    let profile = state
        .db
        .get_profile(&participant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Profile '{participant_id}' not found")))?;
    Ok(Json(profile.into()))
}

/// Get the latest session summary for a participant.
#[utoipa::path(
    get,
    path = "/api/profiles/{id}/summary",
    responses(
        (status = 200, description = "Latest session summary", body = SummaryView),
        (status = 404, description = "No completed session yet", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Participant id")
    )
)]
pub async fn get_last_summary(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<String>,
) -> Result<Json<SummaryView>, ApiError> {
    let summary = state
        .db
        .last_summary(&participant_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No session summary for '{participant_id}'"))
        })?;
    Ok(Json(summary.into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{config::Config, db::Db};
    use anyhow::{Result, anyhow};
    use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use std::path::PathBuf;
    use tracing::Level;
    use vidya_core::{
        channel::DirectiveChannel,
        curriculum::StaticCurriculum,
        llm_client::{LLMAction, LLMClient, LLMStream},
        profile::{Profile, SchoolHistory},
        tracker::SessionTracker,
    };

    pub struct OfflineClient;

    #[async_trait]
    impl LLMClient for OfflineClient {
        async fn decide_action(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            _tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            Ok(LLMAction::TextResponse("Hello!".into()))
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            Err(anyhow!("offline"))
        }
    }

    pub async fn test_state() -> Arc<AppState> {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        Arc::new(AppState {
            db: Arc::new(db),
            channel: DirectiveChannel::new(),
            curriculum: Arc::new(
                StaticCurriculum::new().with_entry("literacy", 0, "Vowels A E I O U."),
            ),
            llm_client: Arc::new(OfflineClient),
            config: Arc::new(Config {
                bind_address: "127.0.0.1:0".parse().unwrap(),
                database_url: "sqlite::memory:".into(),
                provider: Provider::OpenAI,
                openai_api_key: Some("test".into()),
                gemini_api_key: None,
                chat_model: "gpt-4o".into(),
                log_level: Level::INFO,
                curriculum_path: PathBuf::from("./curriculum"),
            }),
        })
    }

    pub fn returning_profile(participant_id: &str) -> Profile {
        let now = Utc::now();
        Profile {
            participant_id: participant_id.into(),
            name: "Asha".into(),
            preferred_language: "Hindi".into(),
            levels: [("literacy".to_string(), 0)].into(),
            current_subject: "literacy".into(),
            current_level: 0,
            learning_goal: "read".into(),
            motivation: "family".into(),
            school_history: SchoolHistory::No,
            learning_path: vec!["literacy".into(), "numeracy".into()],
            completed_topics: vec![],
            points: 0,
            session_count: 1,
            created_at: now,
            last_seen: now,
            onboarding_complete: true,
        }
    }

    #[test]
    fn test_participant_header_parsing() {
        let mut headers = HeaderMap::new();
        let generated = participant_from_headers(&headers).ok().unwrap();
        assert!(Uuid::parse_str(&generated).is_ok());

        headers.insert(PARTICIPANT_HEADER, HeaderValue::from_static(" learner-1 "));
        assert_eq!(participant_from_headers(&headers).ok().unwrap(), "learner-1");

        headers.insert(PARTICIPANT_HEADER, HeaderValue::from_static("  "));
        assert!(matches!(
            participant_from_headers(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let state = test_state().await;
        let Json(health) = health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.provider, "openai");
        assert_eq!(health.curriculum_subjects, vec!["literacy"]);
        assert_eq!(health.active_displays, 0);
    }

    #[tokio::test]
    async fn test_start_session_flags_returning_participants() {
        let state = test_state().await;
        state.db.save_profile(&returning_profile("learner-1")).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(PARTICIPANT_HEADER, HeaderValue::from_static("learner-1"));
        let response = start_session(State(state.clone()), headers)
            .await
            .ok()
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = start_session(State(state), HeaderMap::new())
            .await
            .ok()
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_profile_and_summary_lookups() {
        let state = test_state().await;
        let missing = get_profile(State(state.clone()), Path("nobody".into())).await;
        assert_eq!(
            missing.err().unwrap().into_response().status(),
            StatusCode::NOT_FOUND
        );

        state.db.save_profile(&returning_profile("learner-1")).await.unwrap();
        let Json(view) = get_profile(State(state.clone()), Path("learner-1".into()))
            .await
            .ok()
            .unwrap();
        assert_eq!(view.name, "Asha");

        let no_summary = get_last_summary(State(state.clone()), Path("learner-1".into())).await;
        assert!(matches!(no_summary, Err(ApiError::NotFound(_))));

        let mut tracker = SessionTracker::new("s1", "learner-1", Utc::now());
        tracker.record_visual("letter_A");
        tracker.save(state.db.as_ref()).await.unwrap();
        let Json(summary) = get_last_summary(State(state), Path("learner-1".into()))
            .await
            .ok()
            .unwrap();
        assert_eq!(summary.session_id, "s1");
        assert_eq!(summary.concepts_taught, vec!["Letter A"]);
    }
}
