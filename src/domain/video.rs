//! Per-video state record.
//!
//! A `VideoRecord` is the single source of truth for how far a video has
//! progressed through the pipeline. Stage flags are tri-state (`None` means
//! the stage was never touched) and the status only ever moves forward, with
//! `Error` as an absorbing state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage key of a video: the owning job partitions the videos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoKey {
    pub job_id: String,
    pub video_id: Uuid,
}

impl VideoKey {
    pub fn new(job_id: impl Into<String>, video_id: Uuid) -> Self {
        Self {
            job_id: job_id.into(),
            video_id,
        }
    }
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.video_id)
    }
}

/// Lifecycle status of a video.
///
/// Persisted and serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum VideoStatus {
    Created,
    Generating,
    Generated,
    Uploading,
    Uploaded,
    Error,
}

impl VideoStatus {
    /// Integer code used in storage and on the wire
    pub fn code(self) -> i32 {
        match self {
            Self::Created => 0,
            Self::Generating => 1,
            Self::Generated => 2,
            Self::Uploading => 3,
            Self::Uploaded => 4,
            Self::Error => 999,
        }
    }

    /// Decode an integer code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Generating),
            2 => Some(Self::Generated),
            3 => Some(Self::Uploading),
            4 => Some(Self::Uploaded),
            999 => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal states accept no further stage mutation
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Generated | Self::Uploaded)
    }

    /// Whether a record in this status may be moved to `next`.
    ///
    /// Forward moves along Created → Generating → Generated → Uploading →
    /// Uploaded are allowed (skipping is fine), `Error` is reachable from
    /// anywhere and nothing leaves it.
    pub fn can_transition_to(self, next: VideoStatus) -> bool {
        match (self, next) {
            (Self::Error, Self::Error) => true,
            (Self::Error, _) => false,
            (_, Self::Error) => true,
            (current, next) => next.rank() >= current.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Generating => 1,
            Self::Generated => 2,
            Self::Uploading => 3,
            Self::Uploaded => 4,
            Self::Error => u8::MAX,
        }
    }
}

impl Default for VideoStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl From<VideoStatus> for i32 {
    fn from(status: VideoStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for VideoStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, String> {
        VideoStatus::from_code(code).ok_or_else(|| format!("unknown video status code {}", code))
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Content acquisition parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentSettings {
    pub content_type: Option<String>,
    pub topic: Option<String>,
    pub get_latest_posts: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub min_chars: Option<i32>,
    pub max_chars: Option<i32>,
    pub min_posts: Option<i32>,
    pub max_posts: Option<i32>,
    pub no_of_included_top_comments: Option<i32>,
    pub include_links: Option<bool>,
    pub preferred_duration_in_seconds: Option<i32>,
    pub translate_from_language: Option<String>,
    pub translate_to_language: Option<String>,
}

/// Source and target language of an optional translation stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPair {
    pub from: String,
    pub to: String,
}

impl ContentSettings {
    /// The configured translation pair, if any.
    ///
    /// Translation is configured iff the source language is non-empty.
    pub fn translation_pair(&self) -> Option<TranslationPair> {
        match self.translate_from_language.as_deref() {
            Some(from) if !from.trim().is_empty() => Some(TranslationPair {
                from: from.to_string(),
                to: self.translate_to_language.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSettings {
    pub pitch: Option<f32>,
    pub speed: Option<f32>,
    #[serde(rename = "type")]
    pub speech_type: Option<String>,
    pub language: Option<String>,
    pub pause_before_in_millis: Option<i64>,
    pub pause_after_in_millis: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundSettings {
    pub audio_quality: Option<i32>,
    pub audio_volume_in_percent: Option<f32>,
    pub video_resolution: Option<String>,
}

/// Styling of the sentence overlay burned into the final video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextOverlay {
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub box_color: Option<String>,
    pub text_color: Option<String>,
    pub box_opacity: Option<f32>,
    pub box_border_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    pub disabled_auto_upload: Option<bool>,
    /// Comma-separated account ids
    pub auto_upload_targets: Option<String>,
    pub post_description: Option<String>,
    pub editor_video_resolution: Option<String>,
}

impl UploadSettings {
    pub fn auto_upload_enabled(&self) -> bool {
        !self.disabled_auto_upload.unwrap_or(false)
    }

    /// Configured upload targets with blanks dropped
    pub fn targets(&self) -> Vec<String> {
        self.auto_upload_targets
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Job configuration captured when the video is created.
///
/// Never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    pub content: ContentSettings,
    pub speech: SpeechSettings,
    pub background: BackgroundSettings,
    pub text: TextOverlay,
    pub upload: UploadSettings,
}

/// Durable state of one generated video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: Uuid,
    pub job_id: String,
    pub name: Option<String>,
    pub user_id: String,
    pub user_email: Option<String>,

    pub status: VideoStatus,
    pub job_fire_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,

    /// Optimistic concurrency token, bumped on every write
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub create_done: Option<bool>,
    #[serde(default)]
    pub content_done: Option<bool>,
    #[serde(default)]
    pub translation_done: Option<bool>,
    #[serde(default)]
    pub speech_done: Option<bool>,
    #[serde(default)]
    pub audio_background_done: Option<bool>,
    #[serde(default)]
    pub video_background_done: Option<bool>,
    #[serde(default)]
    pub stitch_done: Option<bool>,
    #[serde(default)]
    pub upload_done: Option<bool>,

    /// JSON array of sentences
    #[serde(default)]
    pub content_text: Option<String>,
    #[serde(default)]
    pub content_category: Option<String>,
    #[serde(default)]
    pub speech_file: Option<String>,
    #[serde(default)]
    pub audio_background_file: Option<String>,
    #[serde(default)]
    pub video_background_file: Option<String>,
    /// Comma-separated per-sentence milliseconds
    #[serde(default)]
    pub durations: Option<String>,
    #[serde(default)]
    pub final_file: Option<String>,
    #[serde(default)]
    pub final_file_sas_url: Option<String>,
    #[serde(default)]
    pub final_file_duration_in_millis: Option<i64>,

    #[serde(default)]
    pub settings: VideoSettings,
}

impl VideoRecord {
    /// A fresh record in `Created` state
    pub fn new(key: VideoKey, user_id: impl Into<String>, settings: VideoSettings) -> Self {
        let now = Utc::now();
        Self {
            video_id: key.video_id,
            job_id: key.job_id,
            name: None,
            user_id: user_id.into(),
            user_email: None,
            status: VideoStatus::Created,
            job_fire_date: None,
            created_at: now,
            updated_at: now,
            error: None,
            version: 0,
            create_done: Some(true),
            content_done: None,
            translation_done: None,
            speech_done: None,
            audio_background_done: None,
            video_background_done: None,
            stitch_done: None,
            upload_done: None,
            content_text: None,
            content_category: None,
            speech_file: None,
            audio_background_file: None,
            video_background_file: None,
            durations: None,
            final_file: None,
            final_file_sas_url: None,
            final_file_duration_in_millis: None,
            settings,
        }
    }

    pub fn key(&self) -> VideoKey {
        VideoKey::new(self.job_id.clone(), self.video_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode `content_text` into its sentence list.
    ///
    /// A missing value decodes to an empty list.
    pub fn sentences(&self) -> Result<Vec<String>, serde_json::Error> {
        match self.content_text.as_deref() {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(text),
            _ => Ok(Vec::new()),
        }
    }

    /// Decode `durations` into per-sentence milliseconds
    pub fn duration_list(&self) -> Result<Vec<i64>, std::num::ParseIntError> {
        match self.durations.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                text.split(',').map(|d| d.trim().parse::<i64>()).collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Category used for background selection
    pub fn category_or_unknown(&self) -> String {
        self.content_category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
    }
}

/// Category sent to background workers before content is classified
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Serialize a sentence list the way `content_text` stores it
pub fn encode_sentences(sentences: &[String]) -> String {
    serde_json::to_string(sentences).unwrap_or_else(|_| "[]".to_string())
}

/// Serialize durations the way `durations` stores them
pub fn encode_durations(durations: &[i64]) -> String {
    durations
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            VideoStatus::Created,
            VideoStatus::Generating,
            VideoStatus::Generated,
            VideoStatus::Uploading,
            VideoStatus::Uploaded,
            VideoStatus::Error,
        ] {
            assert_eq!(VideoStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(VideoStatus::Error.code(), 999);
        assert_eq!(VideoStatus::from_code(5), None);
    }

    #[test]
    fn test_status_serializes_as_code() {
        let json = serde_json::to_string(&VideoStatus::Uploading).unwrap();
        assert_eq!(json, "3");
        let parsed: VideoStatus = serde_json::from_str("999").unwrap();
        assert_eq!(parsed, VideoStatus::Error);
        assert!(serde_json::from_str::<VideoStatus>("7").is_err());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(VideoStatus::Created.can_transition_to(VideoStatus::Generating));
        assert!(VideoStatus::Generating.can_transition_to(VideoStatus::Uploading));
        assert!(VideoStatus::Uploading.can_transition_to(VideoStatus::Error));
        assert!(!VideoStatus::Generated.can_transition_to(VideoStatus::Generating));
        assert!(!VideoStatus::Error.can_transition_to(VideoStatus::Uploaded));
        assert!(VideoStatus::Error.can_transition_to(VideoStatus::Error));
    }

    #[test]
    fn test_terminal_states() {
        assert!(VideoStatus::Error.is_terminal());
        assert!(VideoStatus::Generated.is_terminal());
        assert!(VideoStatus::Uploaded.is_terminal());
        assert!(!VideoStatus::Uploading.is_terminal());
        assert!(!VideoStatus::Created.is_terminal());
    }

    #[test]
    fn test_translation_pair_requires_source_language() {
        let mut content = ContentSettings::default();
        assert!(content.translation_pair().is_none());

        content.translate_from_language = Some("  ".to_string());
        assert!(content.translation_pair().is_none());

        content.translate_from_language = Some("en".to_string());
        content.translate_to_language = Some("fr".to_string());
        let pair = content.translation_pair().unwrap();
        assert_eq!(pair.from, "en");
        assert_eq!(pair.to, "fr");
    }

    #[test]
    fn test_upload_targets_parsing() {
        let upload = UploadSettings {
            auto_upload_targets: Some("acc1, ,acc2,".to_string()),
            ..Default::default()
        };
        assert_eq!(upload.targets(), vec!["acc1", "acc2"]);
        assert!(upload.auto_upload_enabled());

        let disabled = UploadSettings {
            disabled_auto_upload: Some(true),
            ..Default::default()
        };
        assert!(!disabled.auto_upload_enabled());
        assert!(disabled.targets().is_empty());
    }

    #[test]
    fn test_sentences_and_durations_decode() {
        let key = VideoKey::new("job", Uuid::new_v4());
        let mut record = VideoRecord::new(key, "user", VideoSettings::default());
        assert!(record.sentences().unwrap().is_empty());

        record.content_text = Some(encode_sentences(&["a".to_string(), "b".to_string()]));
        record.durations = Some(encode_durations(&[1200, 800]));

        assert_eq!(record.sentences().unwrap(), vec!["a", "b"]);
        assert_eq!(record.duration_list().unwrap(), vec![1200, 800]);
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let key = VideoKey::new("job", Uuid::new_v4());
        let record = VideoRecord::new(key, "user", VideoSettings::default());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["jobId"], "job");
        assert_eq!(value["status"], 0);
        assert_eq!(value["createDone"], true);
    }
}
