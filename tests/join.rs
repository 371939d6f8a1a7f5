//! Join Integration Tests
//!
//! The stitch request must fire exactly once, whatever order the branch
//! results arrive in and however often they are redelivered.

mod common;

use common::*;
use reelflow::domain::{topics, InboundEvent, VideoKey, VideoStatus};

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for pos in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(pos, n - 1);
            out.push(p);
        }
    }
    out
}

fn branch_results(key: &VideoKey, translate: bool) -> Vec<InboundEvent> {
    let mut events = vec![
        content_ok(key, &["first", "second"]),
        speech_ok(key, &[1000, 1100]),
        audio_ok(key),
        video_ok(key),
    ];
    if translate {
        events.push(translation_ok(key, &["premier", "second"]));
    }
    events
}

#[tokio::test]
async fn test_stitch_fires_once_for_every_arrival_order() {
    let orders = permutations(4);
    assert_eq!(orders.len(), 24);

    for order in orders {
        let h = Harness::new();
        let key = h.start(job("job-order")).await;
        let events = branch_results(&key, false);

        for &i in &order {
            h.dispatch(events[i].clone()).await;
        }
        // every result redelivered once more
        for &i in &order {
            h.dispatch(events[i].clone()).await;
        }

        assert_eq!(
            h.bus.count(topics::REQUEST_STITCH),
            1,
            "arrival order {:?}",
            order
        );
        assert_eq!(h.video(&key).await.status, VideoStatus::Generating);
    }
}

#[tokio::test]
async fn test_translation_gates_join_when_configured() {
    for order in permutations(5) {
        let h = Harness::new();
        let mut j = job("job-translate");
        j.settings.content.translate_from_language = Some("en".to_string());
        j.settings.content.translate_to_language = Some("fr".to_string());
        let key = h.start(j).await;
        let events = branch_results(&key, true);

        let mut fired_at = None;
        for (step, &i) in order.iter().enumerate() {
            h.dispatch(events[i].clone()).await;
            if fired_at.is_none() && h.bus.count(topics::REQUEST_STITCH) == 1 {
                fired_at = Some(step);
            }
        }

        assert_eq!(h.bus.count(topics::REQUEST_STITCH), 1, "order {:?}", order);
        assert_eq!(fired_at, Some(4), "fires on the last prerequisite, order {:?}", order);
    }
}

#[tokio::test]
async fn test_translation_never_gates_when_unconfigured() {
    let h = Harness::new();
    let key = h.start(job("job-plain")).await;

    for event in branch_results(&key, false) {
        h.dispatch(event).await;
    }

    let video = h.video(&key).await;
    assert_eq!(video.translation_done, None);
    assert_eq!(h.bus.count(topics::REQUEST_STITCH), 1);
}
