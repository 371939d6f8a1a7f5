//! Status notifiers: HTTP push to a per-user hub channel, or a log line.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::StatusNotifier;
use crate::domain::VideoRecord;

/// Client method invoked on the user's channel
pub const UPDATE_TARGET: &str = "videoUpdate";

/// Configuration for the webhook notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub base_url: String,
    pub hub: String,
    pub timeout_seconds: u64,
}

/// Body posted to the hub
#[derive(Debug, Serialize)]
struct HubMessage<'a> {
    target: &'a str,
    arguments: [&'a VideoRecord; 1],
}

/// Pushes records to `{base_url}/api/v1/hubs/{hub}/users/{user_id}`
pub struct WebhookNotifier {
    base_url: String,
    hub: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            hub: config.hub,
            client,
        })
    }

    /// Build the per-user channel URL
    fn user_url(&self, user_id: &str) -> String {
        format!(
            "{}/api/v1/hubs/{}/users/{}",
            self.base_url, self.hub, user_id
        )
    }
}

#[async_trait]
impl StatusNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, video: &VideoRecord) -> Result<()> {
        let url = self.user_url(&video.user_id);
        let body = HubMessage {
            target: UPDATE_TARGET,
            arguments: [video],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to push status to {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Hub returned {} for {}", response.status(), url);
        }

        Ok(())
    }
}

/// Emits every transition as a structured log event
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, video: &VideoRecord) -> Result<()> {
        info!(
            target: "reelflow::status",
            job_id = %video.job_id,
            video_id = %video.video_id,
            user_id = %video.user_id,
            status = %video.status,
            version = video.version,
            error = video.error.as_deref().unwrap_or(""),
            "Video status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{VideoKey, VideoSettings};
    use uuid::Uuid;

    fn config() -> WebhookConfig {
        WebhookConfig {
            base_url: "http://localhost:8080/".to_string(),
            hub: "main".to_string(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn test_user_url() {
        let notifier = WebhookNotifier::new(config()).unwrap();
        assert_eq!(
            notifier.user_url("user-1"),
            "http://localhost:8080/api/v1/hubs/main/users/user-1"
        );
    }

    #[test]
    fn test_hub_message_shape() {
        let video = VideoRecord::new(
            VideoKey::new("job", Uuid::nil()),
            "user-1",
            VideoSettings::default(),
        );
        let body = HubMessage {
            target: UPDATE_TARGET,
            arguments: [&video],
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["target"], "videoUpdate");
        assert_eq!(value["arguments"][0]["userId"], "user-1");
        assert_eq!(value["arguments"][0]["status"], 0);
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_an_error() {
        let notifier = WebhookNotifier::new(WebhookConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            hub: "main".to_string(),
            timeout_seconds: 1,
        })
        .unwrap();
        let video = VideoRecord::new(
            VideoKey::new("job", Uuid::nil()),
            "user-1",
            VideoSettings::default(),
        );

        assert!(notifier.notify(&video).await.is_err());
    }
}
