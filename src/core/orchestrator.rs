//! Stage handlers of the video pipeline.
//!
//! One handler per inbound event type. Each reads the video record, applies
//! its guard, merges the fields it owns with an optimistic version check and
//! emits the follow-on requests. Status pushes are best-effort and never fail
//! a handler.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::StatusNotifier;
use crate::bus::{BusError, EventBus};
use crate::domain::messages::{
    BackgroundRequest, BackgroundResult, ContentRequest, ContentResult, Envelope, JobDeleted,
    SpeechRequest, SpeechResult, StartProcessing, StitchRequest, StitchResult, TranslationRequest,
    TranslationResult, UploadRequest, UploadResult,
};
use crate::domain::video::{encode_durations, encode_sentences};
use crate::domain::{
    CreateVideo, InboundEvent, OutboundMessage, VideoKey, VideoPatch, VideoRecord, VideoStatus,
};

use super::join::{join_fired, missing_prerequisites};
use super::store::{guarded_merge, Guarded, StoreError, VideoStore};

/// Path prefix of the local storage emulator, stripped from upload paths
const DEV_STORAGE_PREFIX: &str = "/devstoreaccount1/";

/// Errors raised by stage handlers; all of them are retried by redelivery
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("No upload targets configured for auto upload")]
    NoUploadTargets,

    #[error("Corrupt record {key}: {reason}")]
    CorruptRecord { key: VideoKey, reason: String },
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// What a handler did with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The record was written (or the event had an effect)
    Applied,
    /// Stale or duplicate delivery, nothing changed
    Discarded,
}

/// Tunables of the stage handlers
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Re-reads allowed when a merge hits a version conflict
    pub conflict_retries: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            conflict_retries: 8,
        }
    }
}

/// Which background branch a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Background {
    Audio,
    Video,
}

impl Background {
    fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio background",
            Self::Video => "video background",
        }
    }

    fn flag(self) -> FlagOf {
        match self {
            Self::Audio => |v| v.audio_background_done,
            Self::Video => |v| v.video_background_done,
        }
    }

    fn patch(self, file: Option<String>) -> VideoPatch {
        match self {
            Self::Audio => VideoPatch {
                audio_background_file: file,
                audio_background_done: Some(true),
                ..Default::default()
            },
            Self::Video => VideoPatch {
                video_background_file: file,
                video_background_done: Some(true),
                ..Default::default()
            },
        }
    }
}

/// Stage flag guarded by a result handler
type FlagOf = fn(&VideoRecord) -> Option<bool>;

/// Result handlers discard deliveries for terminal records and for stages
/// that already completed.
fn should_discard(video: &VideoRecord, flag: FlagOf) -> bool {
    video.is_terminal() || flag(video) == Some(true)
}

/// The video workflow orchestrator
pub struct Orchestrator {
    store: Arc<dyn VideoStore>,
    bus: Arc<dyn EventBus>,
    notifier: Arc<dyn StatusNotifier>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn VideoStore>,
        bus: Arc<dyn EventBus>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            store,
            bus,
            notifier,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn VideoStore> {
        &self.store
    }

    /// Route an inbound event to its handler
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<HandlerOutcome> {
        match event {
            InboundEvent::CreateVideo(e) => self.handle_create(e).await,
            InboundEvent::StartProcessing(e) => self.handle_start_processing(e).await,
            InboundEvent::Content(e) => self.handle_content_result(e).await,
            InboundEvent::Translation(e) => self.handle_translation_result(e).await,
            InboundEvent::Speech(e) => self.handle_speech_result(e).await,
            InboundEvent::AudioBackground(e) => {
                self.handle_background_result(Background::Audio, e).await
            }
            InboundEvent::VideoBackground(e) => {
                self.handle_background_result(Background::Video, e).await
            }
            InboundEvent::Stitch(e) => self.handle_stitch_result(e).await,
            InboundEvent::Upload(e) => self.handle_upload_result(e).await,
            InboundEvent::JobDeleted(e) => self.handle_job_deleted(e).await,
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Insert a Created record for a fired job and hand it to processing.
    ///
    /// The video id is derived from the job and fire time, so a redelivered
    /// creation finds the record it inserted before. In that case start
    /// processing is re-emitted only while the video has not started.
    #[instrument(skip(self, event), fields(job_id = %event.job.id))]
    pub async fn handle_create(&self, event: &CreateVideo) -> Result<HandlerOutcome> {
        let key = event.video_key();

        if let Some(existing) = self.store.get(&key).await? {
            return self.resume_created(existing).await;
        }

        let mut video = build_record(event, &key);
        video.version = match self.store.insert(video.clone()).await {
            Ok(version) => version,
            Err(StoreError::AlreadyExists(_)) => {
                debug!(video_id = %key.video_id, "Creation raced with a redelivery");
                return match self.store.get(&key).await? {
                    Some(existing) => self.resume_created(existing).await,
                    None => Ok(HandlerOutcome::Discarded),
                };
            }
            Err(e) => return Err(e.into()),
        };

        info!(video_id = %key.video_id, "Video created");
        self.push_status(&video).await;

        self.publish(OutboundMessage::StartProcessing(StartProcessing { video }))
            .await?;
        Ok(HandlerOutcome::Applied)
    }

    async fn resume_created(&self, existing: VideoRecord) -> Result<HandlerOutcome> {
        if existing.status != VideoStatus::Created {
            debug!(video_id = %existing.video_id, status = %existing.status, "Video already started");
            return Ok(HandlerOutcome::Discarded);
        }

        info!(video_id = %existing.video_id, "Re-emitting start processing");
        self.publish(OutboundMessage::StartProcessing(StartProcessing {
            video: existing,
        }))
        .await?;
        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Start processing
    // ========================================================================

    /// Move a Created video to Generating and request the first stages
    #[instrument(skip(self, event), fields(job_id = %event.video.job_id, video_id = %event.video.video_id))]
    pub async fn handle_start_processing(&self, event: &StartProcessing) -> Result<HandlerOutcome> {
        let key = event.video.key();

        let outcome = guarded_merge(
            self.store.as_ref(),
            &key,
            self.settings.conflict_retries,
            |current| {
                (current.status == VideoStatus::Created)
                    .then(|| VideoPatch::new().with_status(VideoStatus::Generating))
            },
        )
        .await?;

        let Some((_, video)) = applied(outcome, "start-processing") else {
            return Ok(HandlerOutcome::Discarded);
        };

        self.push_status(&video).await;

        let sent = async {
            self.request_text_stage(&video).await?;
            self.request_backgrounds(&video).await?;
            Ok::<_, OrchestratorError>(())
        }
        .await;
        self.fail_after_commit(&key, sent).await?;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Content
    // ========================================================================

    #[instrument(skip(self, result), fields(job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    pub async fn handle_content_result(&self, result: &ContentResult) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag: FlagOf = |v| v.content_done;

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), "content")
                .await;
        }

        let sentences = result.sentences.clone().unwrap_or_default();
        let patch = VideoPatch {
            content_text: Some(encode_sentences(&sentences)),
            content_category: result.category.clone().filter(|c| !c.trim().is_empty()),
            content_done: Some(true),
            ..Default::default()
        };

        let Some((before, video)) = self.merge_result(&key, flag, patch, "content").await? else {
            return Ok(HandlerOutcome::Discarded);
        };

        info!(sentences = sentences.len(), "Content received");
        let sent = async {
            self.request_text_stage(&video).await?;
            self.request_backgrounds(&video).await?;
            self.stitch_if_ready(&before, &video).await?;
            Ok::<_, OrchestratorError>(())
        }
        .await;
        self.fail_after_commit(&key, sent).await?;
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Translation
    // ========================================================================

    #[instrument(skip(self, result), fields(job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    pub async fn handle_translation_result(
        &self,
        result: &TranslationResult,
    ) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag: FlagOf = |v| v.translation_done;

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), "translation")
                .await;
        }

        let sentences = result.translated_sentences.clone().unwrap_or_default();
        let patch = VideoPatch {
            content_text: Some(encode_sentences(&sentences)),
            translation_done: Some(true),
            ..Default::default()
        };

        let Some((before, video)) = self.merge_result(&key, flag, patch, "translation").await?
        else {
            return Ok(HandlerOutcome::Discarded);
        };

        let sent = async {
            self.publish(speech_request(&video, sentences)).await?;
            self.stitch_if_ready(&before, &video).await?;
            Ok::<_, OrchestratorError>(())
        }
        .await;
        self.fail_after_commit(&key, sent).await?;
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Speech
    // ========================================================================

    #[instrument(skip(self, result), fields(job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    pub async fn handle_speech_result(&self, result: &SpeechResult) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag: FlagOf = |v| v.speech_done;

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), "speech")
                .await;
        }

        let patch = VideoPatch {
            speech_file: result.file_link.clone(),
            durations: result.durations.as_deref().map(encode_durations),
            speech_done: Some(true),
            ..Default::default()
        };

        let Some((before, video)) = self.merge_result(&key, flag, patch, "speech").await? else {
            return Ok(HandlerOutcome::Discarded);
        };

        let sent = self.stitch_if_ready(&before, &video).await;
        self.fail_after_commit(&key, sent).await?;
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Backgrounds
    // ========================================================================

    #[instrument(skip(self, result), fields(branch = kind.name(), job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    async fn handle_background_result(
        &self,
        kind: Background,
        result: &BackgroundResult,
    ) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag = kind.flag();

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), kind.name())
                .await;
        }

        let patch = kind.patch(result.file_link.clone());
        let Some((before, video)) = self.merge_result(&key, flag, patch, kind.name()).await? else {
            return Ok(HandlerOutcome::Discarded);
        };

        let sent = self.stitch_if_ready(&before, &video).await;
        self.fail_after_commit(&key, sent).await?;
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    pub async fn handle_audio_background_result(
        &self,
        result: &BackgroundResult,
    ) -> Result<HandlerOutcome> {
        self.handle_background_result(Background::Audio, result).await
    }

    pub async fn handle_video_background_result(
        &self,
        result: &BackgroundResult,
    ) -> Result<HandlerOutcome> {
        self.handle_background_result(Background::Video, result).await
    }

    // ========================================================================
    // Stitch
    // ========================================================================

    /// Record the final video and request upload when auto-upload is on.
    ///
    /// Auto-upload without any target is a configuration error: it is raised
    /// before anything is written so redelivery can escalate it to `Error`.
    #[instrument(skip(self, result), fields(job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    pub async fn handle_stitch_result(&self, result: &StitchResult) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag: FlagOf = |v| v.stitch_done;

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), "stitch")
                .await;
        }

        let Some(current) = self.store.get(&key).await? else {
            debug!("Stitch result for missing video");
            return Ok(HandlerOutcome::Discarded);
        };
        if should_discard(&current, flag) {
            debug!(status = %current.status, "Discarding stale stitch result");
            return Ok(HandlerOutcome::Discarded);
        }

        let upload = &current.settings.upload;
        let auto_upload = upload.auto_upload_enabled();
        let targets = upload.targets();
        if auto_upload && targets.is_empty() {
            return Err(OrchestratorError::NoUploadTargets);
        }

        let status = if auto_upload {
            VideoStatus::Uploading
        } else {
            VideoStatus::Generated
        };
        let patch = VideoPatch {
            status: Some(status),
            final_file: result.final_video_link.clone(),
            final_file_sas_url: result.sas_url.clone(),
            final_file_duration_in_millis: result.duration_in_millis,
            stitch_done: Some(true),
            ..Default::default()
        };

        let Some((_, video)) = self.merge_result(&key, flag, patch, "stitch").await? else {
            return Ok(HandlerOutcome::Discarded);
        };

        if auto_upload {
            let sent = self.publish(upload_request(&video, targets)).await;
            self.fail_after_commit(&key, sent).await?;
        } else {
            info!("Auto upload disabled, video ready for manual upload");
        }
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Upload
    // ========================================================================

    #[instrument(skip(self, result), fields(job_id = %result.envelope.job_id, video_id = %result.envelope.video_id))]
    pub async fn handle_upload_result(&self, result: &UploadResult) -> Result<HandlerOutcome> {
        let key = result.envelope.key();
        let flag: FlagOf = |v| v.upload_done;

        if !result.success {
            return self
                .record_failure(&key, flag, result.error.as_deref(), "upload")
                .await;
        }

        let patch = VideoPatch {
            status: Some(VideoStatus::Uploaded),
            upload_done: Some(true),
            ..Default::default()
        };

        let Some((_, video)) = self.merge_result(&key, flag, patch, "upload").await? else {
            return Ok(HandlerOutcome::Discarded);
        };

        info!("Video uploaded");
        self.push_status(&video).await;

        Ok(HandlerOutcome::Applied)
    }

    // ========================================================================
    // Job deletion
    // ========================================================================

    #[instrument(skip(self, event), fields(job_id = %event.job_id))]
    pub async fn handle_job_deleted(&self, event: &JobDeleted) -> Result<HandlerOutcome> {
        let deleted = self.store.delete_job(&event.job_id).await?;
        info!(deleted, "Deleted job videos");

        Ok(if deleted > 0 {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Discarded
        })
    }

    // ========================================================================
    // Escalation
    // ========================================================================

    /// Best-effort terminal failure after the redelivery bound.
    ///
    /// Records already in a terminal state are left alone, so escalating the
    /// same video twice writes `Error` at most once. A creation event whose
    /// record was never inserted gets an `Error` record built from the job.
    #[instrument(skip(self, event, message), fields(topic = event.topic()))]
    pub async fn escalate(&self, event: &InboundEvent, message: &str) -> Result<()> {
        let Some(key) = event.video_key() else {
            return Ok(());
        };

        if let InboundEvent::CreateVideo(create) = event {
            if self.store.get(&key).await?.is_none() {
                let mut video = build_record(create, &key);
                VideoPatch::failed(message)
                    .apply(&mut video)
                    .map_err(StoreError::from)?;

                match self.store.insert(video.clone()).await {
                    Ok(version) => {
                        video.version = version;
                        error!(job_id = %key.job_id, video_id = %key.video_id, error = message, "Inserted failed video");
                        self.push_status(&video).await;
                        return Ok(());
                    }
                    Err(StoreError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let outcome = guarded_merge(
            self.store.as_ref(),
            &key,
            self.settings.conflict_retries,
            |current| (!current.is_terminal()).then(|| VideoPatch::failed(message)),
        )
        .await?;

        match outcome {
            Guarded::Applied { after, .. } => {
                error!(job_id = %key.job_id, video_id = %key.video_id, error = message, "Video failed");
                self.push_status(&after).await;
            }
            Guarded::Discarded(current) => {
                debug!(status = %current.status, "Video already terminal, not escalating");
            }
            Guarded::Missing => {
                warn!(job_id = %key.job_id, video_id = %key.video_id, "Cannot escalate missing video");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Guarded merge of a successful result
    async fn merge_result(
        &self,
        key: &VideoKey,
        flag: FlagOf,
        patch: VideoPatch,
        stage: &'static str,
    ) -> Result<Option<(VideoRecord, VideoRecord)>> {
        let outcome = guarded_merge(
            self.store.as_ref(),
            key,
            self.settings.conflict_retries,
            |current| (!should_discard(current, flag)).then(|| patch.clone()),
        )
        .await?;

        Ok(applied(outcome, stage))
    }

    /// Fail the video when a follow-on request could not be published.
    ///
    /// The handler's merge is already committed, so a redelivery would be
    /// discarded by the flag guard; the error is recorded now and then
    /// returned for the retry policy.
    async fn fail_after_commit(&self, key: &VideoKey, sent: Result<()>) -> Result<()> {
        let Err(err) = sent else {
            return Ok(());
        };
        let message = err.to_string();

        let outcome = guarded_merge(
            self.store.as_ref(),
            key,
            self.settings.conflict_retries,
            |current| (!current.is_terminal()).then(|| VideoPatch::failed(message.clone())),
        )
        .await;

        match outcome {
            Ok(Guarded::Applied { after, .. }) => {
                error!(job_id = %key.job_id, video_id = %key.video_id, error = %message, "Follow-on request failed");
                self.push_status(&after).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!(job_id = %key.job_id, video_id = %key.video_id, error = %e, "Failed to record follow-on failure");
            }
        }

        Err(err)
    }

    /// Move the video to `Error` with the worker's message
    async fn record_failure(
        &self,
        key: &VideoKey,
        flag: FlagOf,
        error: Option<&str>,
        stage: &'static str,
    ) -> Result<HandlerOutcome> {
        let message = error
            .filter(|e| !e.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} stage failed", stage));

        let outcome = guarded_merge(
            self.store.as_ref(),
            key,
            self.settings.conflict_retries,
            |current| (!should_discard(current, flag)).then(|| VideoPatch::failed(message.clone())),
        )
        .await?;

        let Some((_, video)) = applied(outcome, stage) else {
            return Ok(HandlerOutcome::Discarded);
        };

        warn!(stage, error = %message, "Worker reported failure");
        self.push_status(&video).await;
        Ok(HandlerOutcome::Applied)
    }

    /// Request exactly one of content, translation or speech
    async fn request_text_stage(&self, video: &VideoRecord) -> Result<()> {
        if video.content_done != Some(true) {
            return self.publish(content_request(video)).await;
        }

        let sentences = sentences_of(video)?;
        if let Some(pair) = video.settings.content.translation_pair() {
            if video.translation_done != Some(true) {
                return self
                    .publish(OutboundMessage::Translation(TranslationRequest {
                        envelope: Envelope::for_video(video),
                        from_lang_code: pair.from,
                        to_lang_code: pair.to,
                        sentences,
                    }))
                    .await;
            }
        }

        self.publish(speech_request(video, sentences)).await
    }

    /// Request the backgrounds that are not acquired yet
    async fn request_backgrounds(&self, video: &VideoRecord) -> Result<()> {
        if video.audio_background_done != Some(true) {
            self.publish(background_request(video, Background::Audio))
                .await?;
        }
        if video.video_background_done != Some(true) {
            self.publish(background_request(video, Background::Video))
                .await?;
        }
        Ok(())
    }

    /// Emit the stitch request if this write completed the join
    async fn stitch_if_ready(&self, before: &VideoRecord, after: &VideoRecord) -> Result<()> {
        if !join_fired(before, after) {
            debug!(missing = ?missing_prerequisites(after), "Not ready to stitch");
            return Ok(());
        }

        let durations = after
            .duration_list()
            .map_err(|e| OrchestratorError::CorruptRecord {
                key: after.key(),
                reason: format!("durations: {}", e),
            })?;

        info!("All prerequisites met, requesting stitch");
        self.publish(OutboundMessage::Stitch(StitchRequest {
            envelope: Envelope::for_video(after),
            sentences: sentences_of(after)?,
            durations,
            voice_file_link: after.speech_file.clone(),
            audio_background_file_link: after.audio_background_file.clone(),
            video_background_file_link: after.video_background_file.clone(),
            audio_background_volume_in_percent: after.settings.background.audio_volume_in_percent,
            resolution: after.settings.upload.editor_video_resolution.clone(),
            text: after.settings.text.clone(),
        }))
        .await
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        debug!(topic = message.topic(), "Publishing request");
        self.bus.publish(&message).await?;
        Ok(())
    }

    /// Best-effort status push; failures are logged and dropped
    async fn push_status(&self, video: &VideoRecord) {
        if let Err(e) = self.notifier.notify(video).await {
            warn!(
                notifier = self.notifier.name(),
                job_id = %video.job_id,
                video_id = %video.video_id,
                error = %e,
                "Status notification failed"
            );
        }
    }
}

/// Unpack a guarded merge, logging discarded deliveries
fn applied(outcome: Guarded, stage: &str) -> Option<(VideoRecord, VideoRecord)> {
    match outcome {
        Guarded::Applied { before, after } => Some((before, after)),
        Guarded::Missing => {
            debug!(stage, "Discarding result for missing video");
            None
        }
        Guarded::Discarded(current) => {
            debug!(stage, status = %current.status, "Discarding stale or duplicate delivery");
            None
        }
    }
}

fn sentences_of(video: &VideoRecord) -> Result<Vec<String>> {
    video
        .sentences()
        .map_err(|e| OrchestratorError::CorruptRecord {
            key: video.key(),
            reason: format!("content text: {}", e),
        })
}

/// Record for a creation event, with pre-supplied stages marked done
fn build_record(event: &CreateVideo, key: &VideoKey) -> VideoRecord {
    let job = &event.job;
    let mut video = VideoRecord::new(key.clone(), job.user_id.clone(), job.settings.clone());
    video.name = job.name.clone();
    video.user_email = job.user_email.clone();
    video.job_fire_date = Some(event.request_date);

    if let Some(sentences) = job.preselected_sentences() {
        video.content_text = Some(encode_sentences(&sentences));
        video.content_done = Some(true);
    }
    if let Some(file) = job.selected_audio_background.clone().filter(|f| !f.is_empty()) {
        video.audio_background_file = Some(file);
        video.audio_background_done = Some(true);
    }
    if let Some(file) = job.selected_video_background.clone().filter(|f| !f.is_empty()) {
        video.video_background_file = Some(file);
        video.video_background_done = Some(true);
    }

    video
}

fn content_request(video: &VideoRecord) -> OutboundMessage {
    let content = &video.settings.content;
    OutboundMessage::Content(ContentRequest {
        envelope: Envelope::for_video(video),
        content_type: content.content_type.clone(),
        content_topic: content.topic.clone(),
        content_get_latest_posts: content.get_latest_posts,
        content_start_date: content.start_date,
        content_min_chars: content.min_chars,
        content_max_chars: content.max_chars,
        content_min_posts: content.min_posts,
        content_max_posts: content.max_posts,
        content_no_of_included_top_comments: content.no_of_included_top_comments,
        content_include_links: content.include_links,
        content_translate_from_language: content.translate_from_language.clone(),
        content_translate_to_language: content.translate_to_language.clone(),
    })
}

fn speech_request(video: &VideoRecord, sentences: Vec<String>) -> OutboundMessage {
    let speech = &video.settings.speech;
    OutboundMessage::Speech(SpeechRequest {
        envelope: Envelope::for_video(video),
        sentences,
        speech_language: speech.language.clone(),
        speech_pitch: speech.pitch,
        speech_speed: speech.speed,
        speech_type: speech.speech_type.clone(),
        speech_pause_before_in_millis: speech.pause_before_in_millis,
        speech_pause_after_in_millis: speech.pause_after_in_millis,
    })
}

fn background_request(video: &VideoRecord, kind: Background) -> OutboundMessage {
    let background = &video.settings.background;
    let request = |quality| BackgroundRequest {
        envelope: Envelope::for_video(video),
        category: video.category_or_unknown(),
        language_code: video.settings.speech.language.clone(),
        quality,
    };

    match kind {
        Background::Audio => OutboundMessage::AudioBackground(request(
            background.audio_quality.map(|q| q.to_string()),
        )),
        Background::Video => {
            OutboundMessage::VideoBackground(request(background.video_resolution.clone()))
        }
    }
}

fn upload_request(video: &VideoRecord, targets: Vec<String>) -> OutboundMessage {
    let video_path = video
        .final_file
        .as_deref()
        .unwrap_or_default()
        .replace(DEV_STORAGE_PREFIX, "");

    OutboundMessage::Upload(UploadRequest {
        envelope: Envelope::for_video(video),
        video_path,
        account_ids: targets,
        post_description: video.settings.upload.post_description.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, VideoSettings};
    use chrono::{TimeZone, Utc};

    fn create_event() -> CreateVideo {
        CreateVideo {
            request_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            job: Job {
                id: "job-1".to_string(),
                name: Some("Daily".to_string()),
                user_id: "user-1".to_string(),
                selected_content: Some("one\ntwo".to_string()),
                selected_video_background: Some("bg.mp4".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_build_record_applies_preselected_stages() {
        let event = create_event();
        let video = build_record(&event, &event.video_key());

        assert_eq!(video.status, VideoStatus::Created);
        assert_eq!(video.name.as_deref(), Some("Daily"));
        assert_eq!(video.content_done, Some(true));
        assert_eq!(video.sentences().unwrap(), vec!["one", "two"]);
        assert_eq!(video.audio_background_done, None);
        assert_eq!(video.video_background_done, Some(true));
        assert_eq!(video.job_fire_date, Some(event.request_date));
    }

    #[test]
    fn test_upload_request_strips_dev_storage_prefix() {
        let mut video = VideoRecord::new(
            VideoKey::new("job", uuid::Uuid::nil()),
            "user",
            VideoSettings::default(),
        );
        video.final_file = Some("/devstoreaccount1/videos/final.mp4".to_string());

        match upload_request(&video, vec!["acc".to_string()]) {
            OutboundMessage::Upload(request) => {
                assert_eq!(request.video_path, "videos/final.mp4");
                assert_eq!(request.account_ids, vec!["acc"]);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_background_request_defaults_category() {
        let mut video = VideoRecord::new(
            VideoKey::new("job", uuid::Uuid::nil()),
            "user",
            VideoSettings::default(),
        );
        video.settings.speech.language = Some("en-US".to_string());

        match background_request(&video, Background::Audio) {
            OutboundMessage::AudioBackground(request) => {
                assert_eq!(request.category, "unknown");
                assert_eq!(request.language_code.as_deref(), Some("en-US"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_guard() {
        let mut video = VideoRecord::new(
            VideoKey::new("job", uuid::Uuid::nil()),
            "user",
            VideoSettings::default(),
        );
        let flag: FlagOf = |v| v.speech_done;

        assert!(!should_discard(&video, flag));
        video.speech_done = Some(true);
        assert!(should_discard(&video, flag));
        video.speech_done = None;
        video.status = VideoStatus::Generated;
        assert!(should_discard(&video, flag));
    }
}
