use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::WorkerSettings;
use crate::models::message::QueueMessage;

const KEY_PREFIX: &str = "recognition_worker";

// KEYS: pending, messages, receives, inflight, receipts
// ARGV: now_ms, deadline_ms, receipt
// Returns nil when nothing is pending, {id, false, 0} for an id with no stored body.
const RECEIVE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])
for _, handle in ipairs(expired) do
    local id = redis.call('HGET', KEYS[5], handle)
    if id then
        redis.call('RPUSH', KEYS[1], id)
    end
    redis.call('ZREM', KEYS[4], handle)
    redis.call('HDEL', KEYS[5], handle)
end
local id = redis.call('RPOP', KEYS[1])
if not id then
    return nil
end
local payload = redis.call('HGET', KEYS[2], id)
if not payload then
    redis.call('HDEL', KEYS[3], id)
    return {id, false, 0}
end
local count = redis.call('HINCRBY', KEYS[3], id, 1)
redis.call('ZADD', KEYS[4], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[5], ARGV[3], id)
return {id, payload, count}
"#;

// KEYS: pending, messages, receives, inflight, receipts
// ARGV: receipt, now_ms
const DELETE_SCRIPT: &str = r#"
local deadline = redis.call('ZSCORE', KEYS[4], ARGV[1])
if not deadline or tonumber(deadline) < tonumber(ARGV[2]) then
    return 0
end
local id = redis.call('HGET', KEYS[5], ARGV[1])
redis.call('ZREM', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[5], ARGV[1])
if id then
    redis.call('HDEL', KEYS[2], id)
    redis.call('HDEL', KEYS[3], id)
end
return 1
"#;

/// Named message queues with at-least-once delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receive at most one message.
    ///
    /// A received message stays invisible until deleted or its visibility
    /// window lapses.
    async fn receive(&self, queue: &str) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError>;

    async fn send(&self, queue: &str, group: &str, body: &str) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Message payload stored in Redis.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    body: String,
    group: String,
}

/// Receive script reply: id, stored payload (absent if dropped), receive count.
type Popped = (String, Option<String>, u32);

struct QueueKeys {
    pending: String,
    messages: String,
    receives: String,
    inflight: String,
    receipts: String,
}

impl QueueKeys {
    fn new(queue: &str) -> Self {
        Self {
            pending: format!("{KEY_PREFIX}:{queue}:pending"),
            messages: format!("{KEY_PREFIX}:{queue}:messages"),
            receives: format!("{KEY_PREFIX}:{queue}:receives"),
            inflight: format!("{KEY_PREFIX}:{queue}:inflight"),
            receipts: format!("{KEY_PREFIX}:{queue}:receipts"),
        }
    }

    fn all(&self) -> [&str; 5] {
        [
            &self.pending,
            &self.messages,
            &self.receives,
            &self.inflight,
            &self.receipts,
        ]
    }
}

/// Turn a receive script reply into a message, or `None` for a dropped id.
fn message_from_popped(
    queue: &str,
    popped: Popped,
    receipt_handle: String,
) -> Result<Option<QueueMessage>, QueueError> {
    let (message_id, payload, receive_count) = popped;

    let Some(payload) = payload else {
        tracing::warn!(
            queue = %queue,
            message_id = %message_id,
            "Dropped queued message with no stored body"
        );
        return Ok(None);
    };

    let envelope: Envelope = serde_json::from_str(&payload)?;
    Ok(Some(QueueMessage {
        message_id,
        body: envelope.body,
        receipt_handle,
        receive_count,
    }))
}

/// Redis-backed queue with receipt handles and a visibility timeout.
pub struct RedisQueue {
    client: redis::Client,
    visibility_timeout: Duration,
    receive_script: Script,
    delete_script: Script,
}

impl RedisQueue {
    pub fn new(redis_url: &str, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            visibility_timeout,
            receive_script: Script::new(RECEIVE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Number of messages waiting to be received.
    pub async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QueueKeys::new(queue).pending).await?;
        Ok(depth)
    }
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn receive(&self, queue: &str) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let keys = QueueKeys::new(queue);

        // Dropped ids are skipped, so an empty result always means an empty queue.
        loop {
            let now = Utc::now().timestamp_millis();
            let deadline = now + self.visibility_timeout.as_millis() as i64;
            let receipt_handle = Uuid::new_v4().to_string();

            let mut invocation = self.receive_script.prepare_invoke();
            for key in keys.all() {
                invocation.key(key);
            }
            invocation.arg(now).arg(deadline).arg(&receipt_handle);

            let popped: Option<Popped> = invocation.invoke_async(&mut conn).await?;
            let Some(popped) = popped else {
                return Ok(Vec::new());
            };

            if let Some(message) = message_from_popped(queue, popped, receipt_handle)? {
                return Ok(vec![message]);
            }
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let keys = QueueKeys::new(queue);

        let mut invocation = self.delete_script.prepare_invoke();
        for key in keys.all() {
            invocation.key(key);
        }
        invocation
            .arg(receipt_handle)
            .arg(Utc::now().timestamp_millis());

        let deleted: i64 = invocation.invoke_async(&mut conn).await?;
        if deleted == 0 {
            return Err(QueueError::InvalidReceipt(receipt_handle.to_string()));
        }
        Ok(())
    }

    async fn send(&self, queue: &str, group: &str, body: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let keys = QueueKeys::new(queue);
        let message_id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&Envelope {
            body: body.to_string(),
            group: group.to_string(),
        })?;

        redis::pipe()
            .atomic()
            .hset(&keys.messages, &message_id, &payload)
            .ignore()
            .lpush(&keys.pending, &message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        tracing::debug!(queue = %queue, message_id = %message_id, "Message enqueued");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Enqueue a job identity on the request queue, as an upstream producer does.
pub async fn submit_job(
    queue: &dyn QueueClient,
    settings: &WorkerSettings,
    identity: &str,
) -> Result<(), QueueError> {
    queue
        .send(&settings.request_queue, &settings.request_queue_group, identity)
        .await
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Receipt handle is unknown or expired: {0}")]
    InvalidReceipt(String),
}
