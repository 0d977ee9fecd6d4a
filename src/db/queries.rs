use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::db::store::StoreError;
use crate::models::job::{Job, JobStatus};

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|_| StoreError::InvalidStatus(status_str.clone()))?;

    Ok(Job {
        identity: row.try_get("identity")?,
        resource_url: row.try_get("resource_url")?,
        input_filename: row.try_get("input_filename")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        status,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Insert a new pending job
pub async fn create_job(
    pool: &PgPool,
    identity: &str,
    resource_url: &str,
    input_filename: &str,
) -> Result<Job, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO jobs (identity, resource_url, input_filename, status)
        VALUES ($1, $2, $3, 'PENDING')
        RETURNING identity, resource_url, input_filename, result, error, status, completed_at
        "#,
    )
    .bind(identity)
    .bind(resource_url)
    .bind(input_filename)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by its external identity
pub async fn get_job(pool: &PgPool, identity: &str) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT identity, resource_url, input_filename, result, error, status, completed_at
        FROM jobs
        WHERE identity = $1
        "#,
    )
    .bind(identity)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Persist the outcome of one processing pass
pub async fn update_job(pool: &PgPool, job: &Job) -> Result<(), StoreError> {
    let done = sqlx::query(
        r#"
        UPDATE jobs
        SET result = $1,
            error = $2,
            status = $3,
            completed_at = $4,
            updated_at = NOW()
        WHERE identity = $5
        "#,
    )
    .bind(job.result.as_deref())
    .bind(job.error.as_deref())
    .bind(job.status.as_ref())
    .bind(job.completed_at)
    .bind(&job.identity)
    .execute(pool)
    .await?;

    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound(job.identity.clone()));
    }

    Ok(())
}
