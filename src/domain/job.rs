//! Job configuration delivered by the external scheduler.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::video::{VideoKey, VideoSettings};

/// A scheduled video job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub settings: VideoSettings,

    /// Pre-supplied content, one sentence per line (skips content acquisition)
    #[serde(default)]
    pub selected_content: Option<String>,
    /// Pre-supplied audio background file (skips audio background acquisition)
    #[serde(default)]
    pub selected_audio_background: Option<String>,
    /// Pre-supplied video background file (skips video background acquisition)
    #[serde(default)]
    pub selected_video_background: Option<String>,
}

impl Job {
    /// Sentences of the pre-supplied content, if any
    pub fn preselected_sentences(&self) -> Option<Vec<String>> {
        let content = self.selected_content.as_deref()?;
        let sentences: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if sentences.is_empty() {
            None
        } else {
            Some(sentences)
        }
    }
}

/// Creation event: the scheduler fired a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideo {
    pub request_date: DateTime<Utc>,
    pub job: Job,
}

impl CreateVideo {
    /// Key of the video this event creates.
    ///
    /// Derived from the job id and fire timestamp so that a redelivered
    /// creation event addresses the same record.
    pub fn video_key(&self) -> VideoKey {
        VideoKey::new(
            self.job.id.clone(),
            derive_video_id(&self.job.id, self.request_date),
        )
    }
}

/// Derive a stable video id (first 16 bytes of SHA256)
pub fn derive_video_id(job_id: &str, fired_at: DateTime<Utc>) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_bytes());
    hasher.update(b":");
    hasher.update(fired_at.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}
