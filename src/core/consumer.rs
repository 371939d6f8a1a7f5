//! Consumer loops: one task per inbound topic.
//!
//! Each loop leases a message, decodes it, runs it through the dead-letter
//! policy and settles the lease (ack, release or dead-letter).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{BusError, Delivery, FileBus, TopicQueue};
use crate::domain::{topics, InboundEvent};

use super::orchestrator::Orchestrator;
use super::retry::{DeadLetterPolicy, Disposition};

/// Polling and lease settings of the consumer loops
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// How long a leased message stays invisible to other consumers
    pub visibility_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Consumer {
    orchestrator: Arc<Orchestrator>,
    bus: FileBus,
    policy: DeadLetterPolicy,
    settings: ConsumerSettings,
}

impl Consumer {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        bus: FileBus,
        policy: DeadLetterPolicy,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            policy,
            settings,
        }
    }

    fn visibility(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    /// Decide the fate of one delivery.
    ///
    /// Undecodable payloads are dead-lettered right away; redelivering them
    /// can never succeed.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Disposition {
        let event = match InboundEvent::decode(&delivery.topic, &delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(topic = %delivery.topic, message_id = %delivery.message_id, error = %e, "Undecodable message");
                return Disposition::DeadLetter {
                    reason: e.to_string(),
                };
            }
        };

        self.policy
            .run(&self.orchestrator, &event, delivery.dequeue_count)
            .await
    }

    /// Lease and process a single message from `queue`.
    ///
    /// Returns `None` when the queue had nothing to deliver.
    #[instrument(skip(self, queue), fields(topic = queue.topic()))]
    pub async fn process_one(&self, queue: &TopicQueue) -> Result<Option<Disposition>, BusError> {
        let Some(delivery) = queue.lease(self.visibility()).await? else {
            return Ok(None);
        };

        debug!(message_id = %delivery.message_id, dequeue_count = delivery.dequeue_count, "Leased message");
        let disposition = self.handle_delivery(&delivery).await;

        match &disposition {
            Disposition::Ack => queue.ack(&delivery.message_id).await?,
            Disposition::Retry { error } => queue.release(&delivery.message_id, error).await?,
            Disposition::DeadLetter { reason } => {
                queue.dead_letter(&delivery.message_id, reason).await?
            }
        }

        Ok(Some(disposition))
    }

    /// Process inbound topics until every one of them is empty.
    ///
    /// Returns how many deliveries were handled.
    pub async fn drain(&self) -> Result<usize, BusError> {
        let queues: Vec<TopicQueue> = topics::INBOUND.iter().map(|t| self.bus.queue(t)).collect();
        let mut handled = 0;

        loop {
            let mut progressed = false;
            for queue in &queues {
                while self.process_one(queue).await?.is_some() {
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(handled);
            }
        }
    }

    /// Poll one topic until shutdown is signalled
    pub async fn run_topic(
        self: Arc<Self>,
        topic: &'static str,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let queue = self.bus.queue(topic);
        info!(topic, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_one(&queue).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    warn!(topic, error = %e, "Queue error");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!(topic, "Consumer stopped");
    }

    /// Spawn one consumer task per inbound topic
    pub fn spawn_all(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        topics::INBOUND
            .iter()
            .map(|&topic| tokio::spawn(Arc::clone(self).run_topic(topic, shutdown.clone())))
            .collect()
    }
}
