//! Recap cache and status store.
//!
//! One row per cache key, maintained by native upsert. The state machine is
//! `pending -> generating -> {completed, failed}`. A failed transition never
//! touches content fields, so a failed forced regeneration cannot erase a
//! previously completed recap under the same key.
//!
//! The store takes an explicit pool handle; nothing here reaches for ambient
//! application state.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum RecapStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

/// Identity of one episode recap row. All fields are part of the primary key
/// and immutable after creation. `spoiler_cutoff == 0` means no cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRecapKey {
    pub show_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub spoiler_cutoff: u32,
    pub local_model: String,
    pub prompt_version: String,
}

/// Identity of one season recap row. `polish_model == ""` denotes the
/// unpolished entry; a polished recap lives in a separate row under the
/// resolved polish model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonRecapKey {
    pub show_id: String,
    pub season_number: u32,
    pub spoiler_cutoff: u32,
    pub local_model: String,
    pub prompt_version: String,
    pub polish_model: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EpisodeRecapRecord {
    pub show_id: String,
    pub season_number: i64,
    pub episode_number: i64,
    pub spoiler_cutoff: i64,
    pub local_model: String,
    pub prompt_version: String,
    pub status: RecapStatus,
    pub summary_text: Option<String>,
    pub raw_chunk_facts: Option<String>,
    pub runtime_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeasonRecapRecord {
    pub show_id: String,
    pub season_number: i64,
    pub spoiler_cutoff: i64,
    pub local_model: String,
    pub prompt_version: String,
    pub polish_model: String,
    pub status: RecapStatus,
    pub summary_text: Option<String>,
    pub polished_text: Option<String>,
    pub polish_cost: Option<f64>,
    pub source_episodes: Option<String>,
    pub runtime_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SeasonRecapRecord {
    /// Served text: polished when present, otherwise the local summary.
    pub fn display_text(&self) -> Option<&str> {
        self.polished_text
            .as_deref()
            .or(self.summary_text.as_deref())
    }
}

/// Per-status row counts for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub generating: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStatus {
    pub episodes: StatusCounts,
    pub seasons: StatusCounts,
}

#[derive(Clone)]
pub struct RecapStore {
    pool: Pool<Sqlite>,
}

impl RecapStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS episode_recaps (
                show_id TEXT NOT NULL,
                season_number INTEGER NOT NULL,
                episode_number INTEGER NOT NULL,
                spoiler_cutoff INTEGER NOT NULL,
                local_model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                status TEXT NOT NULL,
                summary_text TEXT,
                raw_chunk_facts TEXT,
                runtime_seconds REAL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (show_id, season_number, episode_number,
                             spoiler_cutoff, local_model, prompt_version)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS season_recaps (
                show_id TEXT NOT NULL,
                season_number INTEGER NOT NULL,
                spoiler_cutoff INTEGER NOT NULL,
                local_model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                polish_model TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                summary_text TEXT,
                polished_text TEXT,
                polish_cost REAL,
                source_episodes TEXT,
                runtime_seconds REAL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (show_id, season_number, spoiler_cutoff,
                             local_model, prompt_version, polish_model)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a `generating` marker for the key before any model call.
    ///
    /// Content fields of an existing row are left untouched.
    pub async fn begin_episode_generation(&self, key: &EpisodeRecapKey) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO episode_recaps
                 (show_id, season_number, episode_number, spoiler_cutoff,
                  local_model, prompt_version, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(show_id, season_number, episode_number,
                         spoiler_cutoff, local_model, prompt_version)
             DO UPDATE SET status = excluded.status,
                           updated_at = excluded.updated_at",
        )
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.episode_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .bind(RecapStatus::Generating)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn complete_episode(
        &self,
        key: &EpisodeRecapKey,
        summary_text: &str,
        raw_chunk_facts: &str,
        runtime_seconds: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE episode_recaps
             SET status = ?, summary_text = ?, raw_chunk_facts = ?,
                 runtime_seconds = ?, error_message = NULL, updated_at = ?
             WHERE show_id = ? AND season_number = ? AND episode_number = ?
               AND spoiler_cutoff = ? AND local_model = ? AND prompt_version = ?",
        )
        .bind(RecapStatus::Completed)
        .bind(summary_text)
        .bind(raw_chunk_facts)
        .bind(runtime_seconds)
        .bind(Utc::now())
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.episode_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a key failed, keeping any prior content fields intact.
    pub async fn fail_episode(&self, key: &EpisodeRecapKey, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE episode_recaps
             SET status = ?, error_message = ?, updated_at = ?
             WHERE show_id = ? AND season_number = ? AND episode_number = ?
               AND spoiler_cutoff = ? AND local_model = ? AND prompt_version = ?",
        )
        .bind(RecapStatus::Failed)
        .bind(error_message)
        .bind(Utc::now())
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.episode_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_episode(&self, key: &EpisodeRecapKey) -> Result<Option<EpisodeRecapRecord>> {
        let record = sqlx::query_as::<_, EpisodeRecapRecord>(
            "SELECT * FROM episode_recaps
             WHERE show_id = ? AND season_number = ? AND episode_number = ?
               AND spoiler_cutoff = ? AND local_model = ? AND prompt_version = ?",
        )
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.episode_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn begin_season_generation(&self, key: &SeasonRecapKey) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO season_recaps
                 (show_id, season_number, spoiler_cutoff, local_model,
                  prompt_version, polish_model, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(show_id, season_number, spoiler_cutoff,
                         local_model, prompt_version, polish_model)
             DO UPDATE SET status = excluded.status,
                           updated_at = excluded.updated_at",
        )
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .bind(&key.polish_model)
        .bind(RecapStatus::Generating)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn complete_season(
        &self,
        key: &SeasonRecapKey,
        summary_text: &str,
        polished_text: Option<&str>,
        polish_cost: Option<f64>,
        source_episodes: &[u32],
        runtime_seconds: f64,
    ) -> Result<()> {
        let source_json = serde_json::to_string(source_episodes)?;
        sqlx::query(
            "UPDATE season_recaps
             SET status = ?, summary_text = ?, polished_text = ?, polish_cost = ?,
                 source_episodes = ?, runtime_seconds = ?, error_message = NULL,
                 updated_at = ?
             WHERE show_id = ? AND season_number = ? AND spoiler_cutoff = ?
               AND local_model = ? AND prompt_version = ? AND polish_model = ?",
        )
        .bind(RecapStatus::Completed)
        .bind(summary_text)
        .bind(polished_text)
        .bind(polish_cost)
        .bind(source_json)
        .bind(runtime_seconds)
        .bind(Utc::now())
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .bind(&key.polish_model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a season key failed, keeping any prior content fields intact.
    pub async fn fail_season(&self, key: &SeasonRecapKey, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE season_recaps
             SET status = ?, error_message = ?, updated_at = ?
             WHERE show_id = ? AND season_number = ? AND spoiler_cutoff = ?
               AND local_model = ? AND prompt_version = ? AND polish_model = ?",
        )
        .bind(RecapStatus::Failed)
        .bind(error_message)
        .bind(Utc::now())
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .bind(&key.polish_model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_season(&self, key: &SeasonRecapKey) -> Result<Option<SeasonRecapRecord>> {
        let record = sqlx::query_as::<_, SeasonRecapRecord>(
            "SELECT * FROM season_recaps
             WHERE show_id = ? AND season_number = ? AND spoiler_cutoff = ?
               AND local_model = ? AND prompt_version = ? AND polish_model = ?",
        )
        .bind(&key.show_id)
        .bind(key.season_number as i64)
        .bind(key.spoiler_cutoff as i64)
        .bind(&key.local_model)
        .bind(&key.prompt_version)
        .bind(&key.polish_model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Best available season row across polish variants: completed rows
    /// first, polished preferred over unpolished.
    pub async fn get_season_preferring_polished(
        &self,
        show_id: &str,
        season_number: u32,
        spoiler_cutoff: u32,
        local_model: &str,
        prompt_version: &str,
    ) -> Result<Option<SeasonRecapRecord>> {
        let record = sqlx::query_as::<_, SeasonRecapRecord>(
            "SELECT * FROM season_recaps
             WHERE show_id = ? AND season_number = ? AND spoiler_cutoff = ?
               AND local_model = ? AND prompt_version = ?
             ORDER BY (status = 'completed') DESC,
                      (polish_model != '') DESC,
                      updated_at DESC
             LIMIT 1",
        )
        .bind(show_id)
        .bind(season_number as i64)
        .bind(spoiler_cutoff as i64)
        .bind(local_model)
        .bind(prompt_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Row counts by status for both tables, optionally scoped to one show.
    pub async fn status_counts(&self, show_id: Option<&str>) -> Result<PipelineStatus> {
        let episodes = self.table_counts("episode_recaps", show_id).await?;
        let seasons = self.table_counts("season_recaps", show_id).await?;
        Ok(PipelineStatus { episodes, seasons })
    }

    async fn table_counts(&self, table: &str, show_id: Option<&str>) -> Result<StatusCounts> {
        // Table name comes from the two literals above, never user input.
        let sql = match show_id {
            Some(_) => format!(
                "SELECT status, COUNT(*) FROM {} WHERE show_id = ? GROUP BY status",
                table
            ),
            None => format!("SELECT status, COUNT(*) FROM {} GROUP BY status", table),
        };

        let mut query = sqlx::query_as::<_, (RecapStatus, i64)>(&sql);
        if let Some(id) = show_id {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status {
                RecapStatus::Pending => counts.pending = count,
                RecapStatus::Generating => counts.generating = count,
                RecapStatus::Completed => counts.completed = count,
                RecapStatus::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }
}
