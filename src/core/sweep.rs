//! Retention sweep over the video store.
//!
//! Terminal videos are deleted once they have been idle past the retention
//! window. Videos stuck in a non-terminal state are failed so their owner
//! sees an outcome instead of a pipeline that never finishes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::adapters::StatusNotifier;
use crate::domain::VideoPatch;

use super::store::{guarded_merge, Guarded, StoreError, VideoStore};

pub const STALE_MESSAGE: &str = "Timed out waiting for pipeline progress";

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Idle time after which terminal videos are deleted
    pub terminal_retention: Duration,
    /// Idle time after which non-terminal videos are failed
    pub stale_after: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            terminal_retention: Duration::hours(24),
            stale_after: Duration::minutes(120),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub expired: usize,
}

pub struct RetentionSweeper {
    store: Arc<dyn VideoStore>,
    notifier: Arc<dyn StatusNotifier>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn VideoStore>,
        notifier: Arc<dyn StatusNotifier>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let delete_before = now - self.policy.terminal_retention;
        let stale_before = now - self.policy.stale_after;
        let mut report = SweepReport::default();

        for video in self.store.list_all().await? {
            let key = video.key();

            if video.is_terminal() {
                if video.updated_at < delete_before && self.store.delete(&key).await? {
                    report.deleted += 1;
                }
                continue;
            }

            if video.updated_at >= stale_before {
                continue;
            }

            // re-checked against the current row, progress may have raced us
            let outcome = guarded_merge(self.store.as_ref(), &key, 3, |current| {
                (!current.is_terminal() && current.updated_at < stale_before)
                    .then(|| VideoPatch::failed(STALE_MESSAGE))
            })
            .await?;

            if let Guarded::Applied { after, .. } = outcome {
                report.expired += 1;
                warn!(job_id = %key.job_id, video_id = %key.video_id, "Expired stale video");

                if let Err(e) = self.notifier.notify(&after).await {
                    warn!(notifier = self.notifier.name(), error = %e, "Status notification failed");
                }
            }
        }

        info!(deleted = report.deleted, expired = report.expired, "Retention sweep finished");
        Ok(report)
    }
}
