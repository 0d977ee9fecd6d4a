use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delivery from the request queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Job identity as plain text.
    pub body: String,
    /// Single-use deletion token, valid until deleted or the visibility window lapses.
    pub receipt_handle: String,
    /// Number of times this message has been delivered, including this one.
    pub receive_count: u32,
}

/// Notice published to the shutdown queue when the instance shuts itself down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownNotice {
    pub instance_id: String,
    pub idle_polls: u32,
    pub requested_at: DateTime<Utc>,
}
