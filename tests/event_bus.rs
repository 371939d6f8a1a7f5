//! Event Bus Integration Tests
//!
//! Drives the consumer loops over the file-backed bus: payloads go in as
//! JSON on inbound topics, requests come out on the worker topics.

mod common;

use std::sync::Arc;

use common::*;
use reelflow::bus::FileBus;
use reelflow::core::{
    Consumer, ConsumerSettings, DeadLetterPolicy, Orchestrator, SqliteVideoStore, VideoStore,
};
use reelflow::domain::messages::{ContentResult, SpeechResult, StitchResult};
use reelflow::domain::{topics, InboundEvent, VideoKey, VideoStatus};
use tempfile::TempDir;

struct Pipeline {
    _temp: TempDir,
    bus: FileBus,
    store: Arc<SqliteVideoStore>,
    consumer: Consumer,
}

impl Pipeline {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let bus = FileBus::new(temp.path().join("queues"));
        let store = Arc::new(SqliteVideoStore::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(bus.clone()),
            Arc::new(RecordingNotifier::new()),
        );
        let consumer = Consumer::new(
            Arc::new(orchestrator),
            bus.clone(),
            DeadLetterPolicy::default(),
            ConsumerSettings::default(),
        );

        Self {
            _temp: temp,
            bus,
            store,
            consumer,
        }
    }

    async fn send<T: serde::Serialize>(&self, topic: &str, payload: &T) {
        self.bus
            .publish_raw(topic, serde_json::to_string(payload).unwrap())
            .await
            .unwrap();
    }

    async fn pending(&self, topic: &str) -> Vec<serde_json::Value> {
        self.bus
            .queue(topic)
            .pending()
            .await
            .unwrap()
            .iter()
            .map(|item| serde_json::from_str(&item.payload).unwrap())
            .collect()
    }

    async fn video(&self, key: &VideoKey) -> reelflow::VideoRecord {
        self.store.get(key).await.unwrap().expect("video exists")
    }
}

fn payload_of<T>(event: InboundEvent, pick: impl FnOnce(InboundEvent) -> Option<T>) -> T {
    pick(event).expect("fixture of the expected kind")
}

#[tokio::test]
async fn test_creation_flows_through_queues() {
    let p = Pipeline::new();
    let event = fire(job("job-1"));
    let key = event.video_key();

    p.send(topics::GENERATE_VIDEO, &event).await;

    // creation, then the start-processing hand-off
    assert_eq!(p.consumer.drain().await.unwrap(), 2);
    assert_eq!(p.video(&key).await.status, VideoStatus::Generating);

    let content = p.pending(topics::REQUEST_CONTENT).await;
    assert_eq!(content.len(), 1);
    assert_eq!(content[0]["videoId"], key.video_id.to_string());
    assert_eq!(content[0]["jobId"], "job-1");
    assert_eq!(p.pending(topics::REQUEST_AUDIO_BACKGROUND).await.len(), 1);
    assert_eq!(p.pending(topics::REQUEST_VIDEO_BACKGROUND).await.len(), 1);

    let start = p.bus.queue(topics::START_PROCESSING).stats().await.unwrap();
    assert_eq!(start.acked, 1);

    let result: ContentResult = payload_of(content_ok(&key, &["one", "two"]), |e| match e {
        InboundEvent::Content(r) => Some(r),
        _ => None,
    });
    p.send(topics::CONTENT_RESPONSE, &result).await;
    assert_eq!(p.consumer.drain().await.unwrap(), 1);

    let speech = p.pending(topics::REQUEST_SPEECH).await;
    assert_eq!(speech.len(), 1);
    assert_eq!(speech[0]["sentences"], serde_json::json!(["one", "two"]));
    assert_eq!(speech[0]["speechLanguage"], "en-US");
}

#[tokio::test]
async fn test_undecodable_payload_is_dead_lettered() {
    let p = Pipeline::new();

    p.bus
        .publish_raw(topics::CONTENT_RESPONSE, "{not json".to_string())
        .await
        .unwrap();
    assert_eq!(p.consumer.drain().await.unwrap(), 1);

    let dead = p
        .bus
        .queue(topics::CONTENT_RESPONSE)
        .dead_letters()
        .await
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].dequeue_count, 1);
    assert!(dead[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("Malformed payload"));
}

#[tokio::test]
async fn test_failing_message_is_redelivered_up_to_the_bound() {
    let p = Pipeline::new();
    let mut j = job("job-2");
    j.settings.upload.disabled_auto_upload = None;
    j.selected_content = Some("only".to_string());
    j.selected_audio_background = Some("a.mp3".to_string());
    j.selected_video_background = Some("v.mp4".to_string());
    let event = fire(j);
    let key = event.video_key();

    p.send(topics::GENERATE_VIDEO, &event).await;
    p.consumer.drain().await.unwrap();
    assert_eq!(p.pending(topics::REQUEST_SPEECH).await.len(), 1);

    let speech: SpeechResult = payload_of(speech_ok(&key, &[800]), |e| match e {
        InboundEvent::Speech(r) => Some(r),
        _ => None,
    });
    p.send(topics::SPEECH_RESPONSE, &speech).await;
    p.consumer.drain().await.unwrap();
    assert_eq!(p.pending(topics::REQUEST_STITCH).await.len(), 1);

    let stitch: StitchResult = payload_of(stitch_ok(&key), |e| match e {
        InboundEvent::Stitch(r) => Some(r),
        _ => None,
    });
    p.send(topics::STITCH_RESPONSE, &stitch).await;

    // four retries and the final, dead-lettered delivery
    assert_eq!(p.consumer.drain().await.unwrap(), 5);

    let queue = p.bus.queue(topics::STITCH_RESPONSE);
    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].dequeue_count, 5);
    assert!(queue.pending().await.unwrap().is_empty());

    let video = p.video(&key).await;
    assert_eq!(video.status, VideoStatus::Error);
    assert_eq!(
        video.error.as_deref(),
        Some("No upload targets configured for auto upload")
    );
    assert!(p.pending(topics::REQUEST_UPLOAD).await.is_empty());
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let p = Pipeline::new();
    let event = fire(job("job-3"));
    p.send(topics::GENERATE_VIDEO, &event).await;

    // a fresh handle on the same directory sees the message
    let reopened = FileBus::new(p.bus.dir());
    let pending = reopened
        .queue(topics::GENERATE_VIDEO)
        .pending()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let decoded = InboundEvent::decode(topics::GENERATE_VIDEO, &pending[0].payload).unwrap();
    assert_eq!(decoded.video_key(), Some(event.video_key()));
}

#[tokio::test]
async fn test_compaction_shrinks_logs_after_processing() {
    let p = Pipeline::new();
    let event = fire(job("job-4"));
    let key = event.video_key();

    p.send(topics::GENERATE_VIDEO, &event).await;
    p.consumer.drain().await.unwrap();

    let log = p.bus.queue(topics::GENERATE_VIDEO).log_path().to_path_buf();
    let size_before = std::fs::metadata(&log).unwrap().len();
    assert!(size_before > 0);

    // the two handled inbound messages go, the worker requests stay
    assert_eq!(p.bus.compact().await.unwrap(), 2);
    assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
    assert_eq!(p.pending(topics::REQUEST_CONTENT).await.len(), 1);

    // the queues keep working on the rewritten logs
    let result: ContentResult = payload_of(content_ok(&key, &["x"]), |e| match e {
        InboundEvent::Content(r) => Some(r),
        _ => None,
    });
    p.send(topics::CONTENT_RESPONSE, &result).await;
    assert_eq!(p.consumer.drain().await.unwrap(), 1);
    assert_eq!(p.pending(topics::REQUEST_SPEECH).await.len(), 1);
}
