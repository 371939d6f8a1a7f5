//! Adapter interfaces for external systems.
//!
//! The only outbound side channel the orchestrator owns is the Status
//! Notifier: a best-effort push of the current record to its owner.

pub mod notifier;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::VideoRecord;

pub use notifier::{LogNotifier, WebhookConfig, WebhookNotifier};

/// Pushes the current state of a video to the user who owns it
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Human-readable notifier name
    fn name(&self) -> &str;

    /// Deliver `video` to its owner's channel
    async fn notify(&self, video: &VideoRecord) -> Result<()>;
}
