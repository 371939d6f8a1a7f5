//! JSONL-backed durable topic queue with at-least-once delivery.
//!
//! Follows the EventStore pattern: append-only JSONL with state derived from
//! replay. Every state change of a message (enqueue, lease, ack, release,
//! dead-letter) is appended as a new line. Each operation runs under an
//! exclusive lock on a sidecar file so several processes can share a queue.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BusError, Delivery};

/// An event in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The message this event concerns
    pub message_id: String,

    /// Type of queue event
    pub event_type: QueueEventType,

    /// Additional data (depends on event type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Message published
    Enqueued,

    /// Message handed to a consumer until the lease expires
    Leased,

    /// Consumer finished with the message
    Acked,

    /// Consumer gave the message back for redelivery
    Released,

    /// Message removed from redelivery
    DeadLettered,
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Ready,
    Leased,
    Acked,
    DeadLettered,
}

/// A message with current state (derived from replaying events)
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,

    /// Position in the log, for FIFO ordering
    pub seq: u64,

    pub payload: String,
    pub status: MessageStatus,
    pub enqueued_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,

    /// Number of times the message was leased
    pub dequeue_count: u32,

    /// Last error reported on release or dead-letter
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Whether a consumer may lease this message at `now`
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            MessageStatus::Ready => true,
            MessageStatus::Leased => self.leased_until.map_or(true, |until| until <= now),
            MessageStatus::Acked | MessageStatus::DeadLettered => false,
        }
    }
}

/// Queue status summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub leased: usize,
    pub acked: usize,
    pub dead_lettered: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.ready + self.leased + self.acked + self.dead_lettered
    }
}

/// Durable queue for one topic
#[derive(Debug, Clone)]
pub struct TopicQueue {
    topic: String,
    log_path: PathBuf,
    lock_path: PathBuf,
}

impl TopicQueue {
    /// Queue for `topic` stored under `dir` (`<topic>.jsonl` + `<topic>.lock`)
    pub fn new(dir: &Path, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            log_path: dir.join(format!("{}.jsonl", topic)),
            lock_path: dir.join(format!("{}.lock", topic)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Run `f` on the blocking pool while holding the queue lock
    async fn locked<F, T>(&self, f: F) -> Result<T, BusError>
    where
        F: FnOnce(&Path) -> Result<T, BusError> + Send + 'static,
        T: Send + 'static,
    {
        let log_path = self.log_path.clone();
        let lock_path = self.lock_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = lock_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let lock = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            lock.lock_exclusive()?;

            // Lock is released when `lock` is dropped
            f(&log_path)
        })
        .await?
    }

    /// Publish a payload; returns the message id
    pub async fn enqueue(&self, payload: String) -> Result<String, BusError> {
        let id = Uuid::new_v4().to_string();
        let event = QueueEvent {
            timestamp: Utc::now(),
            message_id: id.clone(),
            event_type: QueueEventType::Enqueued,
            data: Some(serde_json::json!({ "payload": payload })),
        };

        self.locked(move |log| append_event(log, &event)).await?;
        Ok(id)
    }

    /// Lease the oldest available message for `visibility`.
    ///
    /// Increments the message's delivery count. A lease that is never acked
    /// or released makes the message available again once it expires.
    pub async fn lease(&self, visibility: Duration) -> Result<Option<Delivery>, BusError> {
        let topic = self.topic.clone();

        self.locked(move |log| {
            let now = Utc::now();
            let items = replay(log)?;

            let Some(item) = items
                .into_values()
                .filter(|item| item.is_available(now))
                .min_by_key(|item| item.seq)
            else {
                return Ok(None);
            };

            let leased_until = now + visibility;
            append_event(
                log,
                &QueueEvent {
                    timestamp: now,
                    message_id: item.id.clone(),
                    event_type: QueueEventType::Leased,
                    data: Some(serde_json::json!({ "leased_until": leased_until })),
                },
            )?;

            Ok(Some(Delivery {
                message_id: item.id,
                topic,
                payload: item.payload,
                dequeue_count: item.dequeue_count + 1,
                enqueued_at: item.enqueued_at,
            }))
        })
        .await
    }

    /// Mark a message as handled
    pub async fn ack(&self, id: &str) -> Result<(), BusError> {
        self.transition(id, QueueEventType::Acked, None).await
    }

    /// Give a message back for redelivery
    pub async fn release(&self, id: &str, error: &str) -> Result<(), BusError> {
        self.transition(id, QueueEventType::Released, Some(error)).await
    }

    /// Remove a message from redelivery
    pub async fn dead_letter(&self, id: &str, reason: &str) -> Result<(), BusError> {
        self.transition(id, QueueEventType::DeadLettered, Some(reason)).await
    }

    async fn transition(
        &self,
        id: &str,
        event_type: QueueEventType,
        error: Option<&str>,
    ) -> Result<(), BusError> {
        let id = id.to_string();
        let topic = self.topic.clone();
        let data = error.map(|e| serde_json::json!({ "error": e }));

        self.locked(move |log| {
            let items = replay(log)?;
            if !items.contains_key(&id) {
                return Err(BusError::NotFound { topic, id });
            }

            append_event(
                log,
                &QueueEvent {
                    timestamp: Utc::now(),
                    message_id: id,
                    event_type,
                    data,
                },
            )
        })
        .await
    }

    /// Rewrite the log without acked messages.
    ///
    /// Pending and dead-lettered messages keep their delivery count, lease
    /// and last error. Returns how many messages were dropped.
    pub async fn compact(&self) -> Result<usize, BusError> {
        self.locked(|log| {
            if !log.exists() {
                return Ok(0);
            }

            let mut items: Vec<QueueItem> = replay(log)?.into_values().collect();
            let before = items.len();
            items.retain(|item| item.status != MessageStatus::Acked);
            let dropped = before - items.len();
            if dropped == 0 {
                return Ok(0);
            }
            items.sort_by_key(|item| item.seq);

            let tmp = log.with_extension("jsonl.tmp");
            if tmp.exists() {
                fs::remove_file(&tmp)?;
            }
            for item in &items {
                for event in snapshot_events(item) {
                    append_event(&tmp, &event)?;
                }
            }
            if items.is_empty() {
                File::create(&tmp)?;
            }
            fs::rename(&tmp, log)?;

            Ok(dropped)
        })
        .await
    }

    /// Replay the log into the current state of every message
    pub async fn replay(&self) -> Result<HashMap<String, QueueItem>, BusError> {
        self.locked(|log| replay(log)).await
    }

    /// Get a specific message by id
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, BusError> {
        let id = id.to_string();
        self.locked(move |log| Ok(replay(log)?.remove(&id))).await
    }

    pub async fn stats(&self) -> Result<QueueStats, BusError> {
        let items = self.replay().await?;

        let mut stats = QueueStats::default();
        for item in items.values() {
            match item.status {
                MessageStatus::Ready => stats.ready += 1,
                MessageStatus::Leased => stats.leased += 1,
                MessageStatus::Acked => stats.acked += 1,
                MessageStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }

    /// Dead-lettered messages, oldest first
    pub async fn dead_letters(&self) -> Result<Vec<QueueItem>, BusError> {
        let mut items: Vec<QueueItem> = self
            .replay()
            .await?
            .into_values()
            .filter(|item| item.status == MessageStatus::DeadLettered)
            .collect();
        items.sort_by_key(|item| item.seq);
        Ok(items)
    }

    /// Messages not yet acked or dead-lettered, oldest first
    pub async fn pending(&self) -> Result<Vec<QueueItem>, BusError> {
        let mut items: Vec<QueueItem> = self
            .replay()
            .await?
            .into_values()
            .filter(|item| matches!(item.status, MessageStatus::Ready | MessageStatus::Leased))
            .collect();
        items.sort_by_key(|item| item.seq);
        Ok(items)
    }
}

/// Append an event to the log
fn append_event(log: &Path, event: &QueueEvent) -> Result<(), BusError> {
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;

    let json = serde_json::to_string(event)?;
    writeln!(file, "{}", json)?;
    file.flush()?;

    Ok(())
}

/// Events that rebuild `item` in a compacted log
fn snapshot_events(item: &QueueItem) -> Vec<QueueEvent> {
    let mut data = serde_json::json!({ "payload": item.payload });
    let mut prior_leases = item.dequeue_count;
    if item.status == MessageStatus::Leased {
        prior_leases = prior_leases.saturating_sub(1);
    }
    if prior_leases > 0 {
        data["dequeue_count"] = serde_json::json!(prior_leases);
    }
    if let Some(error) = &item.last_error {
        data["error"] = serde_json::json!(error);
    }

    let mut events = vec![QueueEvent {
        timestamp: item.enqueued_at,
        message_id: item.id.clone(),
        event_type: QueueEventType::Enqueued,
        data: Some(data),
    }];

    match item.status {
        MessageStatus::Leased => events.push(QueueEvent {
            timestamp: Utc::now(),
            message_id: item.id.clone(),
            event_type: QueueEventType::Leased,
            data: item
                .leased_until
                .map(|until| serde_json::json!({ "leased_until": until })),
        }),
        MessageStatus::DeadLettered => events.push(QueueEvent {
            timestamp: Utc::now(),
            message_id: item.id.clone(),
            event_type: QueueEventType::DeadLettered,
            data: item.last_error.as_ref().map(|e| serde_json::json!({ "error": e })),
        }),
        MessageStatus::Ready | MessageStatus::Acked => {}
    }

    events
}

/// Replay all events to build current state
fn replay(log: &Path) -> Result<HashMap<String, QueueItem>, BusError> {
    let mut items = HashMap::new();

    if !log.exists() {
        return Ok(items);
    }

    let reader = BufReader::new(File::open(log)?);
    for (seq, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event: QueueEvent = serde_json::from_str(&line)?;
        apply_event(&mut items, seq as u64, event);
    }

    Ok(items)
}

/// Apply a single event to the state
fn apply_event(items: &mut HashMap<String, QueueItem>, seq: u64, event: QueueEvent) {
    let error = event
        .data
        .as_ref()
        .and_then(|d| d.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string);

    match event.event_type {
        QueueEventType::Enqueued => {
            let payload = event
                .data
                .as_ref()
                .and_then(|d| d.get("payload"))
                .and_then(|p| p.as_str());

            // compacted logs carry the delivery history on the enqueue line
            let dequeue_count = event
                .data
                .as_ref()
                .and_then(|d| d.get("dequeue_count"))
                .and_then(|c| c.as_u64())
                .map_or(0, |c| c as u32);

            if let Some(payload) = payload {
                items.insert(
                    event.message_id.clone(),
                    QueueItem {
                        id: event.message_id,
                        seq,
                        payload: payload.to_string(),
                        status: MessageStatus::Ready,
                        enqueued_at: event.timestamp,
                        leased_until: None,
                        dequeue_count,
                        last_error: error,
                    },
                );
            }
        }
        QueueEventType::Leased => {
            if let Some(item) = items.get_mut(&event.message_id) {
                item.status = MessageStatus::Leased;
                item.dequeue_count += 1;
                item.leased_until = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("leased_until"))
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
            }
        }
        QueueEventType::Acked => {
            if let Some(item) = items.get_mut(&event.message_id) {
                item.status = MessageStatus::Acked;
                item.leased_until = None;
            }
        }
        QueueEventType::Released => {
            if let Some(item) = items.get_mut(&event.message_id) {
                item.status = MessageStatus::Ready;
                item.leased_until = None;
                item.last_error = error;
            }
        }
        QueueEventType::DeadLettered => {
            if let Some(item) = items.get_mut(&event.message_id) {
                item.status = MessageStatus::DeadLettered;
                item.leased_until = None;
                item.last_error = error;
            }
        }
    }
}
