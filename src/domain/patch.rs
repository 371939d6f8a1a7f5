//! Partial updates of a video record.
//!
//! Handlers never rewrite whole records. They describe the fields they own
//! as a `VideoPatch` and the store merges it into the current row; `None`
//! fields are left untouched.

use chrono::Utc;
use thiserror::Error;

use super::video::{VideoRecord, VideoStatus};

/// A patch tried to move the status backwards or out of `Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid status transition: {from} → {to}")]
pub struct InvalidTransition {
    pub from: VideoStatus,
    pub to: VideoStatus,
}

/// Fields to merge into a record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub error: Option<String>,

    pub content_done: Option<bool>,
    pub translation_done: Option<bool>,
    pub speech_done: Option<bool>,
    pub audio_background_done: Option<bool>,
    pub video_background_done: Option<bool>,
    pub stitch_done: Option<bool>,
    pub upload_done: Option<bool>,

    pub content_text: Option<String>,
    pub content_category: Option<String>,
    pub speech_file: Option<String>,
    pub durations: Option<String>,
    pub audio_background_file: Option<String>,
    pub video_background_file: Option<String>,
    pub final_file: Option<String>,
    pub final_file_sas_url: Option<String>,
    pub final_file_duration_in_millis: Option<i64>,
}

impl VideoPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch moving the record into `Error` with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(VideoStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: VideoStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `record`, bumping `updated_at`.
    ///
    /// The record is left untouched when the status change is not allowed.
    pub fn apply(&self, record: &mut VideoRecord) -> Result<(), InvalidTransition> {
        if let Some(next) = self.status {
            if !record.status.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }

        merge(&mut record.error, &self.error);
        merge(&mut record.content_done, &self.content_done);
        merge(&mut record.translation_done, &self.translation_done);
        merge(&mut record.speech_done, &self.speech_done);
        merge(&mut record.audio_background_done, &self.audio_background_done);
        merge(&mut record.video_background_done, &self.video_background_done);
        merge(&mut record.stitch_done, &self.stitch_done);
        merge(&mut record.upload_done, &self.upload_done);
        merge(&mut record.content_text, &self.content_text);
        merge(&mut record.content_category, &self.content_category);
        merge(&mut record.speech_file, &self.speech_file);
        merge(&mut record.durations, &self.durations);
        merge(&mut record.audio_background_file, &self.audio_background_file);
        merge(&mut record.video_background_file, &self.video_background_file);
        merge(&mut record.final_file, &self.final_file);
        merge(&mut record.final_file_sas_url, &self.final_file_sas_url);
        merge(
            &mut record.final_file_duration_in_millis,
            &self.final_file_duration_in_millis,
        );

        record.updated_at = Utc::now();
        Ok(())
    }
}

fn merge<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}
