//! Messages exchanged with the worker families.
//!
//! Inbound events are results reported by workers (plus the scheduler's
//! creation event and the internal start-processing hand-off). Outbound
//! messages are requests the orchestrator sends. Every message carries the
//! identity of the video it concerns; payloads are camelCase JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::job::CreateVideo;
use super::video::{TextOverlay, VideoKey, VideoRecord};

/// Topic names of the event bus
pub mod topics {
    pub const GENERATE_VIDEO: &str = "generate-video";
    pub const START_PROCESSING: &str = "start-processing";
    pub const CONTENT_RESPONSE: &str = "content-response";
    pub const TRANSLATION_RESPONSE: &str = "translation-response";
    pub const SPEECH_RESPONSE: &str = "speech-response";
    pub const AUDIO_BACKGROUND_RESULT: &str = "audiobackground-result";
    pub const VIDEO_BACKGROUND_RESULT: &str = "videobackground-result";
    pub const STITCH_RESPONSE: &str = "stitch-video-response";
    pub const UPLOAD_RESULT: &str = "video-upload-result";
    pub const JOB_DELETED: &str = "job-deleted";

    pub const REQUEST_CONTENT: &str = "request-content";
    pub const REQUEST_TRANSLATION: &str = "request-translation";
    pub const REQUEST_SPEECH: &str = "request-speech";
    pub const REQUEST_AUDIO_BACKGROUND: &str = "request-audiobackground";
    pub const REQUEST_VIDEO_BACKGROUND: &str = "request-videobackground";
    pub const REQUEST_STITCH: &str = "request-stitch-video";
    pub const REQUEST_UPLOAD: &str = "request-upload-video";

    /// Topics the orchestrator consumes
    pub const INBOUND: &[&str] = &[
        GENERATE_VIDEO,
        START_PROCESSING,
        CONTENT_RESPONSE,
        TRANSLATION_RESPONSE,
        SPEECH_RESPONSE,
        AUDIO_BACKGROUND_RESULT,
        VIDEO_BACKGROUND_RESULT,
        STITCH_RESPONSE,
        UPLOAD_RESULT,
        JOB_DELETED,
    ];
}

/// Errors decoding an inbound payload
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Identity carried by every request and result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub video_id: Uuid,
    pub job_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl Envelope {
    pub fn for_video(video: &VideoRecord) -> Self {
        Self {
            video_id: video.video_id,
            job_id: video.job_id.clone(),
            user_id: video.user_id.clone(),
            user_email: video.user_email.clone(),
        }
    }

    pub fn key(&self) -> VideoKey {
        VideoKey::new(self.job_id.clone(), self.video_id)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Internal hand-off from creation to processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessing {
    pub video: VideoRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sentences: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub translated_sentences: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub file_link: Option<String>,
    /// Per-sentence milliseconds
    #[serde(default)]
    pub durations: Option<Vec<i64>>,
}

/// Result of an audio or video background acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub file_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub final_video_link: Option<String>,
    #[serde(default)]
    pub sas_url: Option<String>,
    #[serde(default)]
    pub duration_in_millis: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDeleted {
    pub job_id: String,
}

/// Every event the orchestrator consumes
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    CreateVideo(CreateVideo),
    StartProcessing(StartProcessing),
    Content(ContentResult),
    Translation(TranslationResult),
    Speech(SpeechResult),
    AudioBackground(BackgroundResult),
    VideoBackground(BackgroundResult),
    Stitch(StitchResult),
    Upload(UploadResult),
    JobDeleted(JobDeleted),
}

fn parse<T: serde::de::DeserializeOwned>(topic: &str, payload: &str) -> Result<T, MessageError> {
    serde_json::from_str(payload).map_err(|source| MessageError::Malformed {
        topic: topic.to_string(),
        source,
    })
}

impl InboundEvent {
    /// Decode a payload received on `topic`
    pub fn decode(topic: &str, payload: &str) -> Result<Self, MessageError> {
        let event = match topic {
            topics::GENERATE_VIDEO => Self::CreateVideo(parse(topic, payload)?),
            topics::START_PROCESSING => Self::StartProcessing(parse(topic, payload)?),
            topics::CONTENT_RESPONSE => Self::Content(parse(topic, payload)?),
            topics::TRANSLATION_RESPONSE => Self::Translation(parse(topic, payload)?),
            topics::SPEECH_RESPONSE => Self::Speech(parse(topic, payload)?),
            topics::AUDIO_BACKGROUND_RESULT => Self::AudioBackground(parse(topic, payload)?),
            topics::VIDEO_BACKGROUND_RESULT => Self::VideoBackground(parse(topic, payload)?),
            topics::STITCH_RESPONSE => Self::Stitch(parse(topic, payload)?),
            topics::UPLOAD_RESULT => Self::Upload(parse(topic, payload)?),
            topics::JOB_DELETED => Self::JobDeleted(parse(topic, payload)?),
            other => return Err(MessageError::UnknownTopic(other.to_string())),
        };

        Ok(event)
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::CreateVideo(_) => topics::GENERATE_VIDEO,
            Self::StartProcessing(_) => topics::START_PROCESSING,
            Self::Content(_) => topics::CONTENT_RESPONSE,
            Self::Translation(_) => topics::TRANSLATION_RESPONSE,
            Self::Speech(_) => topics::SPEECH_RESPONSE,
            Self::AudioBackground(_) => topics::AUDIO_BACKGROUND_RESULT,
            Self::VideoBackground(_) => topics::VIDEO_BACKGROUND_RESULT,
            Self::Stitch(_) => topics::STITCH_RESPONSE,
            Self::Upload(_) => topics::UPLOAD_RESULT,
            Self::JobDeleted(_) => topics::JOB_DELETED,
        }
    }

    /// The video this event concerns (job deletion spans many)
    pub fn video_key(&self) -> Option<VideoKey> {
        match self {
            Self::CreateVideo(e) => Some(e.video_key()),
            Self::StartProcessing(e) => Some(e.video.key()),
            Self::Content(e) => Some(e.envelope.key()),
            Self::Translation(e) => Some(e.envelope.key()),
            Self::Speech(e) => Some(e.envelope.key()),
            Self::AudioBackground(e) | Self::VideoBackground(e) => Some(e.envelope.key()),
            Self::Stitch(e) => Some(e.envelope.key()),
            Self::Upload(e) => Some(e.envelope.key()),
            Self::JobDeleted(_) => None,
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub content_type: Option<String>,
    pub content_topic: Option<String>,
    pub content_get_latest_posts: Option<bool>,
    pub content_start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub content_min_chars: Option<i32>,
    pub content_max_chars: Option<i32>,
    pub content_min_posts: Option<i32>,
    pub content_max_posts: Option<i32>,
    pub content_no_of_included_top_comments: Option<i32>,
    pub content_include_links: Option<bool>,
    pub content_translate_from_language: Option<String>,
    pub content_translate_to_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub from_lang_code: String,
    pub to_lang_code: String,
    pub sentences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub sentences: Vec<String>,
    pub speech_language: Option<String>,
    pub speech_pitch: Option<f32>,
    pub speech_speed: Option<f32>,
    pub speech_type: Option<String>,
    pub speech_pause_before_in_millis: Option<i64>,
    pub speech_pause_after_in_millis: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub category: String,
    pub language_code: Option<String>,
    /// Audio quality for audio backgrounds, resolution for video backgrounds
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub sentences: Vec<String>,
    pub durations: Vec<i64>,
    pub voice_file_link: Option<String>,
    pub audio_background_file_link: Option<String>,
    pub video_background_file_link: Option<String>,
    pub audio_background_volume_in_percent: Option<f32>,
    pub resolution: Option<String>,
    #[serde(flatten)]
    pub text: TextOverlay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub video_path: String,
    pub account_ids: Vec<String>,
    pub post_description: Option<String>,
}

/// Every request the orchestrator emits
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    StartProcessing(StartProcessing),
    Content(ContentRequest),
    Translation(TranslationRequest),
    Speech(SpeechRequest),
    AudioBackground(BackgroundRequest),
    VideoBackground(BackgroundRequest),
    Stitch(StitchRequest),
    Upload(UploadRequest),
}

impl OutboundMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::StartProcessing(_) => topics::START_PROCESSING,
            Self::Content(_) => topics::REQUEST_CONTENT,
            Self::Translation(_) => topics::REQUEST_TRANSLATION,
            Self::Speech(_) => topics::REQUEST_SPEECH,
            Self::AudioBackground(_) => topics::REQUEST_AUDIO_BACKGROUND,
            Self::VideoBackground(_) => topics::REQUEST_VIDEO_BACKGROUND,
            Self::Stitch(_) => topics::REQUEST_STITCH,
            Self::Upload(_) => topics::REQUEST_UPLOAD,
        }
    }

    pub fn video_key(&self) -> VideoKey {
        match self {
            Self::StartProcessing(m) => m.video.key(),
            Self::Content(m) => m.envelope.key(),
            Self::Translation(m) => m.envelope.key(),
            Self::Speech(m) => m.envelope.key(),
            Self::AudioBackground(m) | Self::VideoBackground(m) => m.envelope.key(),
            Self::Stitch(m) => m.envelope.key(),
            Self::Upload(m) => m.envelope.key(),
        }
    }

    /// JSON payload as written to the topic
    pub fn to_payload(&self) -> serde_json::Result<String> {
        match self {
            Self::StartProcessing(m) => serde_json::to_string(m),
            Self::Content(m) => serde_json::to_string(m),
            Self::Translation(m) => serde_json::to_string(m),
            Self::Speech(m) => serde_json::to_string(m),
            Self::AudioBackground(m) | Self::VideoBackground(m) => serde_json::to_string(m),
            Self::Stitch(m) => serde_json::to_string(m),
            Self::Upload(m) => serde_json::to_string(m),
        }
    }
}
