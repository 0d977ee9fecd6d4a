use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::queries;
use crate::models::job::Job;

/// Durable job records, looked up by the identity carried in queue messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<Job>, StoreError>;

    /// Write back result, error, status and completion time.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, identity: &str) -> Result<Option<Job>, StoreError> {
        queries::get_job(&self.pool, identity).await
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        queries::update_job(&self.pool, job).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Unknown job status in store: {0}")]
    InvalidStatus(String),
}
