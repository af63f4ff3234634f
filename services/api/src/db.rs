//! Data Access Layer
//!
//! SQLite-backed implementations of the core persistence traits. Queries are
//! plain `sqlx::query` calls with bound parameters; list and map fields of a
//! profile are stored as JSON text columns.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use tracing::{debug, info};
use vidya_core::{
    profile::{Profile, SchoolHistory},
    store::{ProfileStore, SummaryStore},
    tracker::SessionSummary,
};

const PROFILE_COLUMNS: &str = "participant_id, name, preferred_language, levels, current_subject, \
     current_level, learning_goal, motivation, school_history, learning_path, completed_topics, \
     points, session_count, created_at, last_seen, onboarding_complete";

/// A wrapper around the `SqlitePool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database behind `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL '{database_url}'"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .disable_statement_logging();
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        debug!(%database_url, "Database connection established");
        Ok(Self::new(pool))
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations are up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Loads a profile, applies `apply` and writes it back in one transaction.
    async fn modify_profile<F>(&self, participant_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Profile) + Send,
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE participant_id = ?"
        ))
        .bind(participant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| anyhow!("No profile for participant '{participant_id}'"))?;
        let mut profile = profile_from_row(&row)?;
        apply(&mut profile);
        upsert_profile(&mut *tx, &profile).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn expect_row_updated(participant_id: &str, rows: u64) -> Result<()> {
    if rows == 0 {
        return Err(anyhow!("No profile for participant '{participant_id}'"));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

fn from_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed JSON in column '{column}'"))
}

fn get_u32(row: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).with_context(|| format!("Column '{column}' out of range: {value}"))
}

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    let school: String = row.try_get("school_history")?;
    Ok(Profile {
        participant_id: row.try_get("participant_id")?,
        name: row.try_get("name")?,
        preferred_language: row.try_get("preferred_language")?,
        levels: from_json(row, "levels")?,
        current_subject: row.try_get("current_subject")?,
        current_level: get_u32(row, "current_level")?,
        learning_goal: row.try_get("learning_goal")?,
        motivation: row.try_get("motivation")?,
        school_history: SchoolHistory::from_label(&school),
        learning_path: from_json(row, "learning_path")?,
        completed_topics: from_json(row, "completed_topics")?,
        points: get_u32(row, "points")?,
        session_count: get_u32(row, "session_count")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        last_seen: row.try_get::<DateTime<Utc>, _>("last_seen")?,
        onboarding_complete: row.try_get("onboarding_complete")?,
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<SessionSummary> {
    Ok(SessionSummary {
        session_id: row.try_get("session_id")?,
        participant_id: row.try_get("participant_id")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        concepts_taught: from_json(row, "concepts")?,
        visuals_shown: from_json(row, "visuals")?,
        successes: get_u32(row, "successes")?,
        exchanges: get_u32(row, "exchanges")?,
        struggles: from_json(row, "struggles")?,
        summary: row.try_get("summary")?,
    })
}

async fn upsert_profile<'e, E>(executor: E, profile: &Profile) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(&format!(
        r#"
        INSERT INTO profiles ({PROFILE_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(participant_id) DO UPDATE SET
            name = excluded.name,
            preferred_language = excluded.preferred_language,
            levels = excluded.levels,
            current_subject = excluded.current_subject,
            current_level = excluded.current_level,
            learning_goal = excluded.learning_goal,
            motivation = excluded.motivation,
            school_history = excluded.school_history,
            learning_path = excluded.learning_path,
            completed_topics = excluded.completed_topics,
            points = excluded.points,
            session_count = excluded.session_count,
            last_seen = excluded.last_seen,
            onboarding_complete = MAX(profiles.onboarding_complete, excluded.onboarding_complete)
        "#
    ))
    .bind(&profile.participant_id)
    .bind(&profile.name)
    .bind(&profile.preferred_language)
    .bind(to_json(&profile.levels)?)
    .bind(&profile.current_subject)
    .bind(i64::from(profile.current_level))
    .bind(&profile.learning_goal)
    .bind(&profile.motivation)
    .bind(profile.school_history.as_str())
    .bind(to_json(&profile.learning_path)?)
    .bind(to_json(&profile.completed_topics)?)
    .bind(i64::from(profile.points))
    .bind(i64::from(profile.session_count))
    .bind(profile.created_at)
    .bind(profile.last_seen)
    .bind(profile.onboarding_complete)
    .execute(executor)
    .await
    .context("Failed to upsert profile")?;
    Ok(())
}

#[async_trait]
impl ProfileStore for Db {
    async fn get_profile(&self, participant_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE participant_id = ?"
        ))
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query profile")?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        upsert_profile(&self.pool, profile).await?;
        debug!(participant_id = %profile.participant_id, "Profile saved");
        Ok(())
    }

    async fn record_session_start(&self, participant_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE profiles SET session_count = session_count + 1, last_seen = ? WHERE participant_id = ?",
        )
        .bind(at)
        .bind(participant_id)
        .execute(&self.pool)
        .await?;
        expect_row_updated(participant_id, result.rows_affected())
    }

    async fn add_points(&self, participant_id: &str, count: u32) -> Result<()> {
        let result = sqlx::query("UPDATE profiles SET points = points + ? WHERE participant_id = ?")
            .bind(i64::from(count))
            .bind(participant_id)
            .execute(&self.pool)
            .await?;
        expect_row_updated(participant_id, result.rows_affected())
    }

    async fn mark_topic_complete(&self, participant_id: &str, topic: &str) -> Result<()> {
        self.modify_profile(participant_id, |p| {
            p.complete_topic(topic);
        })
        .await
    }

    async fn update_level(&self, participant_id: &str, subject: &str, level: u32) -> Result<()> {
        self.modify_profile(participant_id, |p| {
            p.set_level(subject, level);
        })
        .await
    }
}

#[async_trait]
impl SummaryStore for Db {
    async fn save_summary(&self, summary: &SessionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_summaries (
                session_id, participant_id, started_at, ended_at, summary,
                concepts, visuals, successes, exchanges, struggles
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&summary.session_id)
        .bind(&summary.participant_id)
        .bind(summary.started_at)
        .bind(summary.ended_at)
        .bind(&summary.summary)
        .bind(to_json(&summary.concepts_taught)?)
        .bind(to_json(&summary.visuals_shown)?)
        .bind(i64::from(summary.successes))
        .bind(i64::from(summary.exchanges))
        .bind(to_json(&summary.struggles)?)
        .execute(&self.pool)
        .await
        .context("Failed to insert session summary")?;
        Ok(())
    }

    async fn last_summary(&self, participant_id: &str) -> Result<Option<SessionSummary>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, participant_id, started_at, ended_at, summary,
                   concepts, visuals, successes, exchanges, struggles
            FROM session_summaries
            WHERE participant_id = ?
            ORDER BY julianday(started_at) DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query last session summary")?;
        row.as_ref().map(summary_from_row).transpose()
    }
}
