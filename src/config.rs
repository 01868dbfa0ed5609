//! Environment-driven configuration
//!
//! Every stage reads its configuration from environment variables at
//! startup. Shared knobs (store/broker selection and the three
//! timeouts) live in [`CommonConfig`], embedded by value in each stage
//! config. Missing mandatory values and invalid enum spellings are
//! fatal at startup; everything else falls back to a default.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

/// Which relational store backs the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Postgres,
    Sqlite,
}

impl FromStr for DatabaseDriver {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(DatabaseDriver::Postgres),
            "sqlite" => Ok(DatabaseDriver::Sqlite),
            other => bail!("unknown database driver: {other}"),
        }
    }
}

/// Which message broker carries the queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    RabbitMq,
}

impl FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rabbitmq" => Ok(BrokerKind::RabbitMq),
            other => bail!("unknown message broker: {other}"),
        }
    }
}

/// Knobs shared by every stage.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub database_driver: DatabaseDriver,
    pub message_broker: BrokerKind,
    /// Deadline for a single repository query.
    pub db_query_timeout: Duration,
    /// Deadline for a single publish.
    pub broker_timeout: Duration,
    /// Deadline for a single probe.
    pub site_response_timeout: Duration,
}

impl CommonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_driver: env_or("DATABASE_DRIVER", "postgres")
                .parse()
                .context("DATABASE_DRIVER")?,
            message_broker: env_or("MESSAGE_BROKER", "rabbitmq")
                .parse()
                .context("MESSAGE_BROKER")?,
            db_query_timeout: env_secs("DATABASE_QUERY_TIMEOUT_SEC", 5),
            broker_timeout: env_secs("BROKER_TIMEOUT_SEC", 5),
            site_response_timeout: env_secs("SITE_RESPONSE_TIMEOUT_SEC", 5),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick interval; one fan-out of the monitored set per tick.
    pub interval: Duration,
    pub common: CommonConfig,
}

impl SchedulerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            interval: Duration::from_secs(60 * env_parse_or("SCHEDULER_INTERVAL_MIN", 1u64)),
            common: CommonConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Size of the probe worker pool.
    pub workers: usize,
    pub common: CommonConfig,
}

impl CheckerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            workers: env_parse_or("CHECKER_WORKERS", 1000),
            common: CommonConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlerterConfig {
    /// How many consecutive non-successful results constitute "down".
    pub failed_checks_threshold: usize,
    pub common: CommonConfig,
}

impl AlerterConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            failed_checks_threshold: env_parse_or("NUMBER_OF_FAILED_CHECKS", 3),
            common: CommonConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Telegram bot token, read from the file named by
    /// `TELEGRAM_TOKEN_FILE`.
    pub token: String,
    pub common: CommonConfig,
}

impl NotifierConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let token = env_from_file("TELEGRAM_TOKEN_FILE")?;
        if token.is_empty() {
            bail!("TELEGRAM_TOKEN_FILE must name a file containing the bot token");
        }
        Ok(Self {
            token,
            common: CommonConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address of the admin API.
    pub address: String,
    pub common: CommonConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            address: env_or("SERVER_ADDRESS", "server:8080"),
            common: CommonConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub file: String,
}

impl SqliteConfig {
    pub fn from_env() -> Self {
        Self {
            file: env_or("SQLITE_FILE", "storage/sitewatch.db"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub database: String,
}

impl PostgresConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let password = match env_from_file("POSTGRES_PASSWORD_FILE")? {
            password if !password.is_empty() => password,
            _ => "postgres".to_string(),
        };
        Ok(Self {
            user: env_or("POSTGRES_USER", "postgres"),
            password,
            host: env_or("POSTGRES_IP_ADDRESS", "postgres"),
            port: env_or("POSTGRES_PORT", "5432"),
            database: env_or("POSTGRES_DB", "postgres_db"),
        })
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
}

impl RabbitMqConfig {
    pub fn from_env() -> Self {
        Self {
            user: env_or("RABBITMQ_DEFAULT_USER", "guest"),
            password: env_or("RABBITMQ_DEFAULT_PASS", "guest"),
            host: env_or("RABBITMQ_NODE_IP_ADDRESS", "rabbitmq"),
            port: env_or("RABBITMQ_NODE_PORT", "5672"),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.user, self.password, self.host, self.port
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse_or(key, default))
}

/// Read the value of the file named by `key`, trimmed. Empty when the
/// variable is unset.
fn env_from_file(key: &str) -> anyhow::Result<String> {
    match std::env::var(key) {
        Ok(path) if !path.is_empty() => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {key} at {path}"))?;
            Ok(content.trim().to_string())
        }
        _ => Ok(String::new()),
    }
}
