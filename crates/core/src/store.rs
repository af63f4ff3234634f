//! Persistence Contracts
//!
//! The orchestrator only talks to persistence through these traits. The API
//! service backs them with SQLite; [`InMemoryStore`] backs them with maps and
//! is used by tests and local development.

use crate::profile::Profile;
use crate::tracker::SessionSummary;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Persists one profile record per participant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, participant_id: &str) -> Result<Option<Profile>>;

    /// Whole-record upsert. A stored onboarding-complete flag is never cleared.
    async fn save_profile(&self, profile: &Profile) -> Result<()>;

    /// Increments the session counter and refreshes `last_seen`.
    async fn record_session_start(&self, participant_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn add_points(&self, participant_id: &str, count: u32) -> Result<()>;

    async fn mark_topic_complete(&self, participant_id: &str, topic: &str) -> Result<()>;

    async fn update_level(&self, participant_id: &str, subject: &str, level: u32) -> Result<()>;
}

/// Persists immutable session summaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn save_summary(&self, summary: &SessionSummary) -> Result<()>;

    /// The most recently started summary for a participant.
    async fn last_summary(&self, participant_id: &str) -> Result<Option<SessionSummary>>;
}

/// Runs a persistence write, retrying once on failure.
pub async fn with_retry<F, Fut, T>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(operation = %what, error = ?first, "Persistence failed, retrying once");
            op().await
        }
    }
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, Profile>,
    summaries: Vec<SessionSummary>,
}

/// A map-backed store implementing both persistence traits.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn summary_count(&self) -> usize {
        self.tables.read().await.summaries.len()
    }

    async fn update<F>(&self, participant_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Profile) + Send,
    {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(participant_id)
            .ok_or_else(|| anyhow!("No profile for participant '{participant_id}'"))?;
        apply(profile);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get_profile(&self, participant_id: &str) -> Result<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(participant_id).cloned())
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut record = profile.clone();
        if let Some(existing) = tables.profiles.get(&profile.participant_id) {
            record.onboarding_complete |= existing.onboarding_complete;
        }
        tables
            .profiles
            .insert(profile.participant_id.clone(), record);
        Ok(())
    }

    async fn record_session_start(&self, participant_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(participant_id, |p| p.begin_session(at)).await
    }

    async fn add_points(&self, participant_id: &str, count: u32) -> Result<()> {
        self.update(participant_id, |p| p.add_points(count)).await
    }

    async fn mark_topic_complete(&self, participant_id: &str, topic: &str) -> Result<()> {
        self.update(participant_id, |p| {
            p.complete_topic(topic);
        })
        .await
    }

    async fn update_level(&self, participant_id: &str, subject: &str, level: u32) -> Result<()> {
        self.update(participant_id, |p| {
            p.set_level(subject, level);
        })
        .await
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn save_summary(&self, summary: &SessionSummary) -> Result<()> {
        self.tables.write().await.summaries.push(summary.clone());
        Ok(())
    }

    async fn last_summary(&self, participant_id: &str) -> Result<Option<SessionSummary>> {
        let tables = self.tables.read().await;
        Ok(tables
            .summaries
            .iter()
            .filter(|s| s.participant_id == participant_id)
            .max_by_key(|s| s.started_at)
            .cloned())
    }
}
