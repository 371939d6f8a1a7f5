//! Orchestration Event Bus.
//!
//! The orchestrator publishes requests through the `EventBus` trait and
//! consumes results from durable per-topic queues. The local implementation
//! keeps one JSONL queue per topic in a shared directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::OutboundMessage;

pub mod file;
pub mod queue;

pub use file::FileBus;
pub use queue::{MessageStatus, QueueItem, QueueStats, TopicQueue};

/// Errors that can occur on the bus
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Message not found on {topic}: {id}")]
    NotFound { topic: String, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One delivery of a message to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub topic: String,
    pub payload: String,

    /// 1 on first delivery, incremented on every redelivery
    pub dequeue_count: u32,

    pub enqueued_at: DateTime<Utc>,
}

/// Outbound side of the bus
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError>;
}
