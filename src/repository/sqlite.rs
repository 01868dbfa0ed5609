//! SQLite repository implementation
//!
//! Single-file store for single-machine deployments and test
//! fixtures. Configured the same way as the metrics stores it grew out
//! of: WAL journal for concurrent readers, normal synchronous level,
//! a busy timeout to ride out lock contention, and embedded migrations
//! run at connect.
//!
//! Timestamps are stored as Unix milliseconds; `latency` and `code`
//! are nullable integer columns.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::error::{RepoError, RepoResult};
use super::Repository;
use crate::model::{Chat, CheckResult, Site};

pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Open (creating if missing) the database at `path` and run
    /// migrations.
    #[instrument(skip_all)]
    pub async fn connect(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        info!("opening SQLite store at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RepoError::ConnectionFailed(e.to_string()))?;

        debug!("running SQLite migrations");
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        Ok(Self { pool })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn result_from_row(row: &sqlx::sqlite::SqliteRow) -> CheckResult {
        CheckResult {
            site: Site {
                id: row.get("id"),
                url: row.get("url"),
            },
            time: Self::millis_to_timestamp(row.get("time")),
            latency: row.get::<Option<i64>, _>("latency").into(),
            code: row.get::<Option<i64>, _>("code").into(),
        }
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn add_site(&self, url: &str) -> RepoResult<()> {
        sqlx::query("INSERT INTO sites (url) VALUES (?) ON CONFLICT DO NOTHING")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()> {
        self.add_site(url).await?;

        let site_id: i64 = match sqlx::query_scalar("SELECT id FROM sites WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(id) => id,
            None => return Ok(()),
        };

        sqlx::query(
            "INSERT INTO chat_to_site (chat_id, site_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(chat_id)
        .bind(site_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_site_by_id(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()> {
        let site_id: Option<i64> = sqlx::query_scalar("SELECT id FROM sites WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        let Some(site_id) = site_id else {
            return Ok(());
        };

        sqlx::query("DELETE FROM chat_to_site WHERE chat_id = ? AND site_id = ?")
            .bind(chat_id)
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn site_by_id(&self, id: i64) -> RepoResult<Site> {
        let row = sqlx::query("SELECT id, url FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;

        Ok(Site {
            id: row.get("id"),
            url: row.get("url"),
        })
    }

    async fn all_sites(&self) -> RepoResult<Vec<Site>> {
        let rows = sqlx::query("SELECT id, url FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Site {
                id: row.get("id"),
                url: row.get("url"),
            })
            .collect())
    }

    async fn monitored_sites(&self) -> RepoResult<Vec<Site>> {
        let rows = sqlx::query(
            "SELECT DISTINCT s.id, s.url FROM sites AS s JOIN chat_to_site AS c ON s.id = c.site_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Site {
                id: row.get("id"),
                url: row.get("url"),
            })
            .collect())
    }

    async fn sites_by_chat_id(&self, chat_id: i64) -> RepoResult<Vec<Site>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.url
            FROM chat_to_site AS c
            JOIN sites AS s ON c.site_id = s.id
            WHERE c.chat_id = ?
            ORDER BY s.id
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Site {
                id: row.get("id"),
                url: row.get("url"),
            })
            .collect())
    }

    async fn add_result(&self, result: &CheckResult) -> RepoResult<()> {
        sqlx::query("INSERT INTO check_results (site_id, time, latency, code) VALUES (?, ?, ?, ?)")
            .bind(result.site.id)
            .bind(Self::timestamp_to_millis(&result.time))
            .bind(result.latency.get())
            .bind(result.code.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_results_for_site(&self, site: &Site, n: u32) -> RepoResult<Vec<CheckResult>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.url, c.time, c.latency, c.code
            FROM check_results AS c
            JOIN sites AS s ON c.site_id = s.id
            WHERE s.id = ?
            ORDER BY c.time DESC
            LIMIT ?
            "#,
        )
        .bind(site.id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::result_from_row).collect())
    }

    async fn second_to_last_successful_for_site(
        &self,
        site: &Site,
    ) -> RepoResult<Option<CheckResult>> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.url, c.time, c.latency, c.code
            FROM check_results AS c
            JOIN sites AS s ON c.site_id = s.id
            WHERE s.id = ? AND c.code = 200
            ORDER BY c.time DESC
            LIMIT 1 OFFSET 1
            "#,
        )
        .bind(site.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::result_from_row))
    }

    async fn upsert_chat(&self, chat: &Chat) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (id, is_subscribed)
            VALUES (?, ?)
            ON CONFLICT (id) DO UPDATE SET is_subscribed = excluded.is_subscribed
            "#,
        )
        .bind(chat.id)
        .bind(chat.is_subscribed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_chat_subscribed(&self, chat_id: i64, subscribed: bool) -> RepoResult<()> {
        sqlx::query("UPDATE chats SET is_subscribed = ? WHERE id = ?")
            .bind(subscribed)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn chats_subscribed_to_url(&self, url: &str) -> RepoResult<Vec<Chat>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.is_subscribed
            FROM chats AS c
            JOIN chat_to_site AS cs ON c.id = cs.chat_id
            JOIN sites AS s ON cs.site_id = s.id
            WHERE c.is_subscribed = TRUE AND s.url = ?
            "#,
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Chat {
                id: row.get("id"),
                is_subscribed: row.get("is_subscribed"),
            })
            .collect())
    }
}
