use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::debug;

/// Row type holding the proxy subscription URL
pub const KIND_PROXY_SUBSCRIPTION: &str = "clash";
/// Row type holding the MongoDB connection string
pub const KIND_MONGO: &str = "mongo";
/// Row type holding the Redis connection string
pub const KIND_REDIS: &str = "redis";

/// Read side of the shared `configs` table.
///
/// Each row keys one connection string by its `type` column; the
/// scraper only ever reads them, other services own the writes.
pub struct ConfigStore {
    pool: Pool<Postgres>,
}

impl ConfigStore {
    /// Connect to the configuration database
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context(format!("Failed to connect to PostgreSQL: {}", url))?;

        debug!("Connected to the configuration database");

        Ok(Self { pool })
    }

    /// Fetch the value stored under one row type.
    /// A missing row is an error; every known type is expected to exist.
    pub async fn value(&self, kind: &str) -> Result<String> {
        let value: String = sqlx::query_scalar("SELECT values FROM configs WHERE type = $1")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .context(format!("Failed to load '{}' configuration", kind))?;

        Ok(value)
    }

    /// MongoDB connection string for the document sink
    pub async fn mongo_url(&self) -> Result<String> {
        self.value(KIND_MONGO).await
    }

    /// Redis connection string for the queue sink
    pub async fn redis_url(&self) -> Result<String> {
        self.value(KIND_REDIS).await
    }

    /// Subscription URL fed to the proxy configuration converter
    pub async fn proxy_subscription(&self) -> Result<String> {
        self.value(KIND_PROXY_SUBSCRIPTION).await
    }
}
