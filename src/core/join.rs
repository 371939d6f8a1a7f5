//! Join Evaluator: decides when a video is ready to be stitched.
//!
//! The predicate is recomputed from the record's flags on every update, so
//! results may arrive in any order and any number of times.

use crate::domain::VideoRecord;

fn done(flag: Option<bool>) -> bool {
    flag == Some(true)
}

/// Whether every prerequisite of the stitch stage is satisfied.
///
/// Translation only gates the join when a translation pair is configured.
pub fn ready_to_stitch(video: &VideoRecord) -> bool {
    let translation_satisfied =
        video.settings.content.translation_pair().is_none() || done(video.translation_done);

    done(video.content_done)
        && translation_satisfied
        && done(video.speech_done)
        && done(video.audio_background_done)
        && done(video.video_background_done)
}

/// Whether a write moving `before` to `after` is the one that completed the join.
///
/// True for exactly one write per record, since flags never go back to unset.
pub fn join_fired(before: &VideoRecord, after: &VideoRecord) -> bool {
    !ready_to_stitch(before) && ready_to_stitch(after)
}

/// Prerequisites still missing, for logging
pub fn missing_prerequisites(video: &VideoRecord) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !done(video.content_done) {
        missing.push("content");
    }
    if video.settings.content.translation_pair().is_some() && !done(video.translation_done) {
        missing.push("translation");
    }
    if !done(video.speech_done) {
        missing.push("speech");
    }
    if !done(video.audio_background_done) {
        missing.push("audio_background");
    }
    if !done(video.video_background_done) {
        missing.push("video_background");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{VideoKey, VideoSettings};
    use uuid::Uuid;

    fn video(translate: bool) -> VideoRecord {
        let mut settings = VideoSettings::default();
        if translate {
            settings.content.translate_from_language = Some("en".to_string());
            settings.content.translate_to_language = Some("fr".to_string());
        }
        VideoRecord::new(VideoKey::new("job", Uuid::new_v4()), "user", settings)
    }

    fn complete(video: &mut VideoRecord) {
        video.content_done = Some(true);
        video.speech_done = Some(true);
        video.audio_background_done = Some(true);
        video.video_background_done = Some(true);
    }

    #[test]
    fn test_translation_not_required_when_unconfigured() {
        let mut v = video(false);
        assert!(!ready_to_stitch(&v));
        complete(&mut v);
        assert!(ready_to_stitch(&v));
        assert!(missing_prerequisites(&v).is_empty());
    }

    #[test]
    fn test_translation_gates_when_configured() {
        let mut v = video(true);
        complete(&mut v);
        assert!(!ready_to_stitch(&v));
        assert_eq!(missing_prerequisites(&v), vec!["translation"]);

        v.translation_done = Some(true);
        assert!(ready_to_stitch(&v));
    }

    #[test]
    fn test_false_flag_is_not_done() {
        let mut v = video(false);
        complete(&mut v);
        v.speech_done = Some(false);
        assert!(!ready_to_stitch(&v));
    }

    #[test]
    fn test_fires_once_in_every_order() {
        type Setter = fn(&mut VideoRecord);
        let setters: [Setter; 4] = [
            |v| v.content_done = Some(true),
            |v| v.speech_done = Some(true),
            |v| v.audio_background_done = Some(true),
            |v| v.video_background_done = Some(true),
        ];

        // every permutation of the four arrivals, each delivered twice
        let mut orders = Vec::new();
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    for d in 0..4 {
                        let order = [a, b, c, d];
                        let mut seen = [false; 4];
                        if order.iter().all(|&i| !std::mem::replace(&mut seen[i], true)) {
                            orders.push(order);
                        }
                    }
                }
            }
        }
        assert_eq!(orders.len(), 24);

        for order in orders {
            let mut current = video(false);
            let mut fired = 0;
            for &i in order.iter().chain(order.iter()) {
                let before = current.clone();
                setters[i](&mut current);
                if join_fired(&before, &current) {
                    fired += 1;
                }
            }
            assert_eq!(fired, 1, "order {:?}", order);
        }
    }
}
