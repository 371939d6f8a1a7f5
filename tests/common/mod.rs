//! Shared test doubles and fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use reelflow::adapters::StatusNotifier;
use reelflow::bus::{BusError, EventBus};
use reelflow::core::{HandlerOutcome, Orchestrator, SqliteVideoStore, VideoStore};
use reelflow::domain::messages::{
    BackgroundResult, ContentResult, Envelope, SpeechResult, StitchResult, TranslationResult,
    UploadResult,
};
use reelflow::domain::video::{SpeechSettings, UploadSettings};
use reelflow::domain::{
    topics, CreateVideo, InboundEvent, Job, OutboundMessage, VideoKey, VideoRecord, VideoSettings,
    VideoStatus,
};

pub const USER_ID: &str = "user-1";

/// Bus double that records every published message
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishing to `topic` fail until `heal` is called
    pub fn fail_on(&self, topic: &'static str) {
        self.failing.lock().unwrap().insert(topic);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn all(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<OutboundMessage> {
        self.all()
            .into_iter()
            .filter(|m| m.topic() == topic)
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.on_topic(topic).len()
    }

    /// Remove and return the messages published to `topic`
    pub fn take(&self, topic: &str) -> Vec<OutboundMessage> {
        let mut published = self.published.lock().unwrap();
        let (taken, kept): (Vec<_>, Vec<_>) =
            published.drain(..).partition(|m| m.topic() == topic);
        *published = kept;
        taken
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        if self.failing.lock().unwrap().contains(message.topic()) {
            return Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure on {}", message.topic()),
            )));
        }
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Notifier double that records every pushed record
#[derive(Default)]
pub struct RecordingNotifier {
    pushed: Mutex<Vec<VideoRecord>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pushed(&self) -> Vec<VideoRecord> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<VideoStatus> {
        self.pushed().iter().map(|v| v.status).collect()
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, video: &VideoRecord) -> Result<()> {
        self.pushed.lock().unwrap().push(video.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("hub unavailable");
        }
        Ok(())
    }
}

/// Orchestrator wired to an in-memory store and recording doubles
pub struct Harness {
    pub store: Arc<SqliteVideoStore>,
    pub bus: Arc<RecordingBus>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(SqliteVideoStore::open_in_memory().unwrap());
        let bus = Arc::new(RecordingBus::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator = Orchestrator::new(store.clone(), bus.clone(), notifier.clone());

        Self {
            store,
            bus,
            notifier,
            orchestrator,
        }
    }

    pub async fn dispatch(&self, event: InboundEvent) -> HandlerOutcome {
        self.orchestrator.dispatch(&event).await.unwrap()
    }

    /// Fire `job`, then deliver the resulting start-processing event
    pub async fn start(&self, job: Job) -> VideoKey {
        let event = fire(job);
        let key = event.video_key();

        self.dispatch(InboundEvent::CreateVideo(event)).await;

        let start = self.bus.take(topics::START_PROCESSING);
        assert_eq!(start.len(), 1, "creation emits one start-processing event");
        match start.into_iter().next() {
            Some(OutboundMessage::StartProcessing(start)) => {
                self.dispatch(InboundEvent::StartProcessing(start)).await;
            }
            other => panic!("unexpected message {:?}", other),
        }

        key
    }

    pub async fn video(&self, key: &VideoKey) -> VideoRecord {
        self.store.get(key).await.unwrap().expect("video exists")
    }
}

/// A job with auto-upload disabled and no translation
pub fn job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        name: Some("Daily digest".to_string()),
        user_id: USER_ID.to_string(),
        user_email: Some("user@example.com".to_string()),
        settings: VideoSettings {
            speech: SpeechSettings {
                language: Some("en-US".to_string()),
                speed: Some(1.0),
                ..Default::default()
            },
            upload: UploadSettings {
                disabled_auto_upload: Some(true),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn fire(job: Job) -> CreateVideo {
    CreateVideo {
        request_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        job,
    }
}

pub fn envelope(key: &VideoKey) -> Envelope {
    Envelope {
        video_id: key.video_id,
        job_id: key.job_id.clone(),
        user_id: USER_ID.to_string(),
        user_email: None,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn content_ok(key: &VideoKey, sentences: &[&str]) -> InboundEvent {
    InboundEvent::Content(ContentResult {
        envelope: envelope(key),
        success: true,
        error: None,
        sentences: Some(strings(sentences)),
        category: Some("technology".to_string()),
    })
}

pub fn content_failed(key: &VideoKey, error: &str) -> InboundEvent {
    InboundEvent::Content(ContentResult {
        envelope: envelope(key),
        success: false,
        error: Some(error.to_string()),
        sentences: None,
        category: None,
    })
}

pub fn translation_ok(key: &VideoKey, sentences: &[&str]) -> InboundEvent {
    InboundEvent::Translation(TranslationResult {
        envelope: envelope(key),
        success: true,
        error: None,
        translated_sentences: Some(strings(sentences)),
    })
}

pub fn speech_ok(key: &VideoKey, durations: &[i64]) -> InboundEvent {
    InboundEvent::Speech(SpeechResult {
        envelope: envelope(key),
        success: true,
        error: None,
        file_link: Some("speech/voice.mp3".to_string()),
        durations: Some(durations.to_vec()),
    })
}

fn background(key: &VideoKey, file: &str) -> BackgroundResult {
    BackgroundResult {
        envelope: envelope(key),
        success: true,
        error: None,
        file_link: Some(file.to_string()),
    }
}

pub fn audio_ok(key: &VideoKey) -> InboundEvent {
    InboundEvent::AudioBackground(background(key, "audio/bg.mp3"))
}

pub fn video_ok(key: &VideoKey) -> InboundEvent {
    InboundEvent::VideoBackground(background(key, "video/bg.mp4"))
}

pub fn stitch_ok(key: &VideoKey) -> InboundEvent {
    InboundEvent::Stitch(StitchResult {
        envelope: envelope(key),
        success: true,
        error: None,
        final_video_link: Some("/devstoreaccount1/final/video.mp4".to_string()),
        sas_url: Some("https://storage.local/final/video.mp4?sig=abc".to_string()),
        duration_in_millis: Some(42_000),
    })
}

pub fn upload_ok(key: &VideoKey) -> InboundEvent {
    InboundEvent::Upload(UploadResult {
        envelope: envelope(key),
        success: true,
        error: None,
    })
}

pub fn upload_failed(key: &VideoKey, error: &str) -> InboundEvent {
    InboundEvent::Upload(UploadResult {
        envelope: envelope(key),
        success: false,
        error: Some(error.to_string()),
    })
}
