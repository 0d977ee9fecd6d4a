use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Status endpoint bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the job store
    pub database_url: String,

    /// Redis connection string for the request and shutdown queues
    pub redis_url: String,

    /// Result bucket name
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Queue the worker drains for job identities
    #[serde(default = "default_request_queue")]
    pub request_queue: String,

    #[serde(default = "default_request_queue_group")]
    pub request_queue_group: String,

    /// Queue that receives a notice whenever this instance shuts itself down
    #[serde(default = "default_shutdown_queue")]
    pub shutdown_queue: String,

    #[serde(default = "default_shutdown_queue_group")]
    pub shutdown_queue_group: String,

    /// Sleep after an empty poll, in milliseconds
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,

    /// Sleep after a processed job, in milliseconds
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,

    /// Consecutive empty polls before the host is shut down
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: u32,

    #[serde(default)]
    pub auto_shutdown: bool,

    /// Deliveries after which a failing job is given up on (0 = never)
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// External recognition command; the resource URL is appended as the last argument.
    #[serde(default = "default_recognizer_program")]
    pub recognizer_program: String,

    #[serde(default = "default_recognizer_args")]
    pub recognizer_args: Vec<String>,

    #[serde(default = "default_recognition_timeout_secs")]
    pub recognition_timeout_secs: u64,

    /// Host shutdown command
    #[serde(default = "default_shutdown_program")]
    pub shutdown_program: String,

    #[serde(default = "default_shutdown_args")]
    pub shutdown_args: Vec<String>,

    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_request_queue() -> String {
    "image-requests".to_string()
}

fn default_request_queue_group() -> String {
    "image-requests-group".to_string()
}

fn default_shutdown_queue() -> String {
    "instance-shutdown".to_string()
}

fn default_shutdown_queue_group() -> String {
    "instance-shutdown-group".to_string()
}

fn default_max_sleep_ms() -> u64 {
    20_000
}

fn default_min_sleep_ms() -> u64 {
    1_000
}

fn default_idle_threshold() -> u32 {
    3
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_recognizer_program() -> String {
    "python3".to_string()
}

fn default_recognizer_args() -> Vec<String> {
    vec!["image_classification.py".to_string()]
}

fn default_recognition_timeout_secs() -> u64 {
    120
}

fn default_shutdown_program() -> String {
    "sudo".to_string()
}

fn default_shutdown_args() -> Vec<String> {
    vec!["shutdown".to_string(), "-h".to_string(), "now".to_string()]
}

fn default_instance_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        Ok(envy::from_iter(vars)?)
    }

    /// Extract and validate the knobs that drive the worker loop.
    pub fn worker_settings(&self) -> Result<WorkerSettings, ConfigError> {
        let settings = WorkerSettings {
            request_queue: self.request_queue.clone(),
            request_queue_group: self.request_queue_group.clone(),
            shutdown_queue: self.shutdown_queue.clone(),
            shutdown_queue_group: self.shutdown_queue_group.clone(),
            max_sleep_ms: self.max_sleep_ms,
            min_sleep_ms: self.min_sleep_ms,
            idle_threshold: self.idle_threshold,
            auto_shutdown: self.auto_shutdown,
            max_receive_count: self.max_receive_count,
            instance_id: self.instance_id.clone(),
        };
        settings.check()?;
        Ok(settings)
    }

    pub fn recognition_timeout(&self) -> Result<Duration, ConfigError> {
        if self.recognition_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("RECOGNITION_TIMEOUT_SECS"));
        }
        Ok(Duration::from_secs(self.recognition_timeout_secs))
    }

    pub fn visibility_timeout(&self) -> Result<Duration, ConfigError> {
        if self.visibility_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("VISIBILITY_TIMEOUT_SECS"));
        }
        Ok(Duration::from_secs(self.visibility_timeout_secs))
    }
}

/// Configuration of the poll/process/backoff/shutdown loop.
#[derive(Debug, Clone, Validate)]
pub struct WorkerSettings {
    #[garde(length(min = 1))]
    pub request_queue: String,

    #[garde(length(min = 1))]
    pub request_queue_group: String,

    #[garde(length(min = 1))]
    pub shutdown_queue: String,

    #[garde(length(min = 1))]
    pub shutdown_queue_group: String,

    #[garde(range(min = 1))]
    pub max_sleep_ms: u64,

    #[garde(range(min = 1))]
    pub min_sleep_ms: u64,

    #[garde(range(min = 1))]
    pub idle_threshold: u32,

    #[garde(skip)]
    pub auto_shutdown: bool,

    #[garde(skip)]
    pub max_receive_count: u32,

    #[garde(length(min = 1))]
    pub instance_id: String,
}

impl WorkerSettings {
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.max_sleep_ms < self.min_sleep_ms {
            return Err(ConfigError::SleepRange {
                min: self.min_sleep_ms,
                max: self.max_sleep_ms,
            });
        }
        Ok(())
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    /// Whether a failed delivery with this receive count is the last one allowed.
    pub fn is_final_attempt(&self, receive_count: u32) -> bool {
        self.max_receive_count > 0 && receive_count >= self.max_receive_count
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid worker settings: {0}")]
    Invalid(#[from] garde::Report),

    #[error("MAX_SLEEP_MS ({max}) must not be below MIN_SLEEP_MS ({min})")]
    SleepRange { min: u64, max: u64 },

    #[error("{0} must be at least 1")]
    ZeroTimeout(&'static str),
}
