use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Durable store for recognition results, keyed by input filename.
///
/// Writing the same key twice replaces the earlier value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Result sink on an S3-compatible bucket.
pub struct S3ResultSink {
    bucket: Box<Bucket>,
}

impl S3ResultSink {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Read a stored result back.
    pub async fn get(&self, key: &str) -> Result<String, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        check_status(key, response.status_code())?;
        Ok(String::from_utf8_lossy(response.as_slice()).into_owned())
    }
}

#[async_trait]
impl ResultSink for S3ResultSink {
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, value.as_bytes(), TEXT_CONTENT_TYPE)
            .await
            .map_err(StorageError::S3)?;
        check_status(key, response.status_code())
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            status,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Storage returned status {status} for key {key}")]
    Status { key: String, status: u16 },
}
