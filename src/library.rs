//! Read-only collaborator boundary: show/episode metadata, cast, subtitles.
//!
//! The recap pipeline never writes through this interface. The SQLite
//! implementation reads the tables the library sync process maintains.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};

use crate::error::Result;
use crate::subtitle::SubtitleLine;

#[derive(Debug, Clone)]
pub struct ShowMeta {
    pub title: String,
    pub overview: String,
}

#[derive(Debug, Clone)]
pub struct EpisodeMeta {
    pub title: String,
    pub overview: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn show(&self, show_id: &str) -> Result<Option<ShowMeta>>;

    async fn episode(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Option<EpisodeMeta>>;

    /// Episode numbers present in a season, ascending.
    async fn episode_numbers(&self, show_id: &str, season: u32) -> Result<Vec<u32>>;

    /// Subtitle lines for one episode, ordered by start time.
    async fn subtitles(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Vec<SubtitleLine>>;

    /// Character names for a show, top billing first, capped at `limit`.
    async fn cast(&self, show_id: &str, limit: usize) -> Result<Vec<String>>;
}

pub struct SqliteLibrary {
    pool: Pool<Sqlite>,
}

impl SqliteLibrary {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaLibrary for SqliteLibrary {
    async fn show(&self, show_id: &str) -> Result<Option<ShowMeta>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT title, overview FROM shows WHERE show_id = ?")
                .bind(show_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(title, overview)| ShowMeta { title, overview }))
    }

    async fn episode(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Option<EpisodeMeta>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT title, overview FROM episodes
             WHERE show_id = ? AND season_number = ? AND episode_number = ?",
        )
        .bind(show_id)
        .bind(season as i64)
        .bind(episode as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(title, overview)| EpisodeMeta { title, overview }))
    }

    async fn episode_numbers(&self, show_id: &str, season: u32) -> Result<Vec<u32>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT episode_number FROM episodes
             WHERE show_id = ? AND season_number = ?
             ORDER BY episode_number ASC",
        )
        .bind(show_id)
        .bind(season as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(n,)| n as u32).collect())
    }

    async fn subtitles(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Vec<SubtitleLine>> {
        let rows: Vec<(f64, f64, Option<String>, String)> = sqlx::query_as(
            "SELECT start_time, end_time, speaker, line FROM subtitles
             WHERE show_id = ? AND season_number = ? AND episode_number = ?
             ORDER BY start_time ASC",
        )
        .bind(show_id)
        .bind(season as i64)
        .bind(episode as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start_time, end_time, speaker, text)| SubtitleLine {
                start_time,
                end_time,
                speaker,
                text,
            })
            .collect())
    }

    async fn cast(&self, show_id: &str, limit: usize) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT character_name FROM cast_members
             WHERE show_id = ?
             ORDER BY billing_order ASC
             LIMIT ?",
        )
        .bind(show_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
