//! Error taxonomy integration tests: invalid input, failure events, the
//! transient/permanent retry split, and unknown-session handling.

mod common;

use common::*;
use std::time::Duration;

const SESSION: u64 = 1;

#[tokio::test]
async fn empty_input_is_invalid() {
    let rig = TestRig::new().await;

    assert!(matches!(
        rig.sessions.enqueue(SESSION, "").await,
        Err(AudioError::InvalidSource(_))
    ));
    assert!(matches!(
        rig.sessions.enqueue(SESSION, "   ").await,
        Err(AudioError::InvalidSource(_))
    ));
}

#[tokio::test]
async fn failed_track_emits_event_and_queue_moves_on() {
    let rig = TestRig::new().await;
    rig.fetcher.add_track(&source(0), "Broken", 1.0);
    rig.fetcher.fail_audio_once(
        &source(0),
        AudioError::FetchUnavailable("video removed".to_string()),
    );
    rig.fetcher.add_track(&source(1), "Working", 10.0);

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();
    rig.sessions.enqueue(SESSION, &url(1)).await.unwrap();

    let failed = wait_for_event(&mut subscriber, Duration::from_secs(5), |e| {
        matches!(e, Event::TrackFailed { session_id, .. } if *session_id == SESSION)
    })
    .await;
    match failed {
        Event::TrackFailed { url: failed_url, error, .. } => {
            assert_eq!(failed_url, url(0));
            assert!(matches!(error, AudioError::FetchUnavailable(_)));
        }
        _ => unreachable!(),
    }

    // The queue advanced past the broken track on its own
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "Working");
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let rig = TestRig::new().await;
    rig.fetcher.add_track(&source(0), "Gone", 1.0);
    rig.fetcher.fail_audio_once(
        &source(0),
        AudioError::FetchUnavailable("video removed".to_string()),
    );

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();

    wait_for_event(&mut subscriber, Duration::from_secs(5), |e| {
        matches!(e, Event::TrackFailed { .. })
    })
    .await;

    assert_eq!(rig.fetcher.audio_call_count(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let config = Config {
        fetch_retries: 2,
        ..test_config()
    };
    let rig = TestRig::with_config(config).await;
    rig.fetcher.add_track(&source(0), "Eventually", 10.0);
    rig.fetcher.fail_audio_once(
        &source(0),
        AudioError::FetchTransient("timed out".to_string()),
    );
    rig.fetcher.fail_audio_once(
        &source(0),
        AudioError::FetchTransient("timed out again".to_string()),
    );

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();

    assert_eq!(
        wait_for_started(&mut subscriber, SESSION).await,
        "Eventually"
    );
    assert_eq!(rig.fetcher.audio_call_count(), 3);
}

#[tokio::test]
async fn retries_exhausted_fails_the_track() {
    let config = Config {
        fetch_retries: 1,
        ..test_config()
    };
    let rig = TestRig::with_config(config).await;
    rig.fetcher.add_track(&source(0), "Hopeless", 1.0);
    for _ in 0..3 {
        rig.fetcher.fail_audio_once(
            &source(0),
            AudioError::FetchTransient("flaky network".to_string()),
        );
    }

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();

    let failed = wait_for_event(&mut subscriber, Duration::from_secs(5), |e| {
        matches!(e, Event::TrackFailed { .. })
    })
    .await;
    match failed {
        Event::TrackFailed { error, .. } => assert!(error.is_transient()),
        _ => unreachable!(),
    }

    // One initial attempt plus one retry
    assert_eq!(rig.fetcher.audio_call_count(), 2);
}

#[tokio::test]
async fn operations_on_unknown_sessions_fail_cleanly() {
    let rig = TestRig::new().await;

    assert!(matches!(
        rig.sessions.skip(42).await,
        Err(AudioError::UnknownSession(42))
    ));
    assert!(matches!(
        rig.sessions.clear(42).await,
        Err(AudioError::UnknownSession(42))
    ));
    assert!(matches!(
        rig.sessions.remove(42, 1).await,
        Err(AudioError::UnknownSession(42))
    ));
    assert!(matches!(
        rig.sessions.pause(42),
        Err(AudioError::UnknownSession(42))
    ));
}

#[tokio::test]
async fn corrupt_cached_payload_is_refetched() {
    let rig = TestRig::new().await;
    rig.fetcher.add_track(&source(0), "Damaged", 10.0);

    // Commit a real entry, then destroy the payload behind the cache's back
    let entry = rig.pool.fetch(&source(0)).await.expect("seed fetch failed");
    std::fs::remove_file(&entry.local_path).unwrap();

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();

    // The session evicts the broken entry and fetches a fresh copy
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "Damaged");
    assert_eq!(rig.fetcher.audio_call_count(), 2);
}
