//! The repository contract and its store implementations
//!
//! The pipeline owns no persistent state of its own: sites, probe
//! results and chat subscriptions all live behind the [`Repository`]
//! trait, and the implementation is chosen at startup from
//! `DATABASE_DRIVER`.
//!
//! ## Implementations
//!
//! - **PostgreSQL** (default): production deployments
//! - **SQLite**: single-machine deployments and fixtures
//! - **In-memory**: stage tests without database dependencies

pub mod error;
pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CommonConfig, DatabaseDriver, PostgresConfig, SqliteConfig};
use crate::model::{Chat, CheckResult, Site};

pub use error::{RepoError, RepoResult};
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use sqlite::SqliteRepository;

/// Capability set over the site/results/chat datastore.
///
/// Implementations must be `Send + Sync`; every method is a single
/// logical statement (or a short statement sequence) so callers can
/// wrap each call in its own deadline.
#[async_trait]
pub trait Repository: Send + Sync {
    // sites

    /// Insert a site; a site with the same URL already present is left
    /// untouched.
    async fn add_site(&self, url: &str) -> RepoResult<()>;

    /// Insert a site if absent and bind it to `chat_id` if not already
    /// bound. Both steps are idempotent.
    async fn add_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()>;

    /// Remove a site; its bindings and results go with it.
    async fn delete_site_by_id(&self, id: i64) -> RepoResult<()>;

    /// Remove the binding between `chat_id` and the site at `url`.
    /// A missing site or binding is not an error.
    async fn delete_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()>;

    async fn site_by_id(&self, id: i64) -> RepoResult<Site>;

    async fn all_sites(&self) -> RepoResult<Vec<Site>>;

    /// Sites referenced by at least one chat binding: the set the
    /// scheduler drives.
    async fn monitored_sites(&self) -> RepoResult<Vec<Site>>;

    async fn sites_by_chat_id(&self, chat_id: i64) -> RepoResult<Vec<Site>>;

    // results

    async fn add_result(&self, result: &CheckResult) -> RepoResult<()>;

    /// The last `n` results for `site`, newest first.
    async fn last_results_for_site(&self, site: &Site, n: u32) -> RepoResult<Vec<CheckResult>>;

    /// The second most recent successful result for `site`, or `None`
    /// when fewer than two successes exist.
    async fn second_to_last_successful_for_site(
        &self,
        site: &Site,
    ) -> RepoResult<Option<CheckResult>>;

    // chats

    async fn upsert_chat(&self, chat: &Chat) -> RepoResult<()>;

    async fn set_chat_subscribed(&self, chat_id: i64, subscribed: bool) -> RepoResult<()>;

    /// Subscribed chats bound to the site at `url`.
    async fn chats_subscribed_to_url(&self, url: &str) -> RepoResult<Vec<Chat>>;
}

/// Connect the store selected by `DATABASE_DRIVER`, running its
/// migrations.
pub async fn connect(common: &CommonConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match common.database_driver {
        DatabaseDriver::Sqlite => {
            let config = SqliteConfig::from_env();
            Ok(Arc::new(SqliteRepository::connect(&config.file).await?))
        }
        DatabaseDriver::Postgres => {
            let config = PostgresConfig::from_env()?;
            Ok(Arc::new(PostgresRepository::connect(&config.url()).await?))
        }
    }
}
