//! File-backed bus: one `TopicQueue` per topic under a shared directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, EventBus, TopicQueue};
use crate::domain::OutboundMessage;

#[derive(Debug, Clone)]
pub struct FileBus {
    dir: PathBuf,
}

impl FileBus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue of a topic
    pub fn queue(&self, topic: &str) -> TopicQueue {
        TopicQueue::new(&self.dir, topic)
    }

    /// Enqueue a raw payload onto `topic`
    pub async fn publish_raw(&self, topic: &str, payload: String) -> Result<String, BusError> {
        self.queue(topic).enqueue(payload).await
    }

    /// Topics that have a log under the bus directory
    pub async fn topics(&self) -> Result<Vec<String>, BusError> {
        let mut topics = Vec::new();
        if !self.dir.exists() {
            return Ok(topics);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                topics.push(stem.to_string());
            }
        }
        topics.sort();
        Ok(topics)
    }

    /// Compact every topic log; returns how many acked messages were dropped
    pub async fn compact(&self) -> Result<usize, BusError> {
        let mut dropped = 0;
        for topic in self.topics().await? {
            let n = self.queue(&topic).compact().await?;
            if n > 0 {
                debug!(topic = %topic, dropped = n, "Compacted queue log");
            }
            dropped += n;
        }
        Ok(dropped)
    }
}

#[async_trait]
impl EventBus for FileBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        let topic = message.topic();
        let payload = message.to_payload()?;
        let id = self.publish_raw(topic, payload).await?;

        debug!(topic, message_id = %id, video = %message.video_key(), "Published");
        Ok(())
    }
}
