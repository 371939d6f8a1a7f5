//! Retry / dead-letter policy wrapped around every stage handler.
//!
//! A failing handler leaves its message for redelivery until the delivery
//! count reaches the bound. At the bound the video is escalated to `Error`
//! (best effort) and the message is dead-lettered.

use tracing::{error, warn};

use crate::domain::InboundEvent;

use super::orchestrator::Orchestrator;

/// What the consumer should do with a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handled (or safely discarded)
    Ack,
    /// Make the message available for redelivery
    Retry { error: String },
    /// Remove the message from redelivery
    DeadLetter { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Delivery count at which a failing message is dead-lettered
    pub max_dequeue_count: u32,
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        Self {
            max_dequeue_count: 5,
        }
    }
}

impl DeadLetterPolicy {
    pub fn new(max_dequeue_count: u32) -> Self {
        Self {
            max_dequeue_count: max_dequeue_count.max(1),
        }
    }

    /// Whether a failure on this delivery exhausts the retries
    pub fn is_exhausted(&self, dequeue_count: u32) -> bool {
        dequeue_count >= self.max_dequeue_count
    }

    /// Run the handler for `event` and decide the message's fate.
    ///
    /// `dequeue_count` is 1 on first delivery.
    pub async fn run(
        &self,
        orchestrator: &Orchestrator,
        event: &InboundEvent,
        dequeue_count: u32,
    ) -> Disposition {
        let topic = event.topic();

        let err = match orchestrator.dispatch(event).await {
            Ok(_) => return Disposition::Ack,
            Err(e) => e,
        };
        let message = err.to_string();

        if !self.is_exhausted(dequeue_count) {
            warn!(topic, dequeue_count, error = %message, "Handler failed, will retry");
            return Disposition::Retry { error: message };
        }

        error!(
            topic,
            dequeue_count,
            max = self.max_dequeue_count,
            error = %message,
            "Retries exhausted, dead-lettering"
        );

        if let Err(e) = orchestrator.escalate(event, &message).await {
            error!(topic, error = %e, "Failed to record terminal error");
        }

        Disposition::DeadLetter { reason: message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound() {
        let policy = DeadLetterPolicy::default();
        assert_eq!(policy.max_dequeue_count, 5);
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }

    #[test]
    fn test_zero_bound_is_clamped() {
        let policy = DeadLetterPolicy::new(0);
        assert_eq!(policy.max_dequeue_count, 1);
        assert!(policy.is_exhausted(1));
    }
}
