//! Session queue integration tests: ordering, skip, remove, clear, and the
//! bounded metadata prefetch horizon.

mod common;

use common::*;
use std::time::Duration;

const SESSION: u64 = 1;

#[tokio::test]
async fn tracks_play_in_enqueue_order() {
    let rig = TestRig::new().await;
    for (n, title) in [(0, "First"), (1, "Second"), (2, "Third")] {
        rig.fetcher.add_track(&source(n), title, 0.1);
    }

    let mut subscriber = rig.subscribe();
    let driver = drive_frames(rig.sessions.clone(), SESSION);

    for n in 0..3u8 {
        rig.sessions.enqueue(SESSION, &url(n)).await.unwrap();
    }

    let mut played = Vec::new();
    for _ in 0..3 {
        played.push(wait_for_started(&mut subscriber, SESSION).await);
    }
    driver.abort();

    assert_eq!(played, vec!["First", "Second", "Third"]);
}

#[tokio::test]
async fn enqueue_positions_are_relative_to_current() {
    let rig = TestRig::new().await;
    for n in 0..3u8 {
        rig.fetcher.add_track(&source(n), &format!("Track {n}"), 5.0);
    }

    let mut subscriber = rig.subscribe();

    // First enqueue lands at position 0 and starts playing
    assert_eq!(rig.sessions.enqueue(SESSION, &url(0)).await.unwrap(), 0);
    wait_for_started(&mut subscriber, SESSION).await;

    assert_eq!(rig.sessions.enqueue(SESSION, &url(1)).await.unwrap(), 1);
    assert_eq!(rig.sessions.enqueue(SESSION, &url(2)).await.unwrap(), 2);
}

#[tokio::test]
async fn skip_moves_to_the_next_track() {
    let rig = TestRig::new().await;
    rig.fetcher.add_track(&source(0), "Skipped", 10.0);
    rig.fetcher.add_track(&source(1), "Next up", 10.0);

    let mut subscriber = rig.subscribe();
    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();
    rig.sessions.enqueue(SESSION, &url(1)).await.unwrap();
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "Skipped");

    rig.sessions.skip(SESSION).await.unwrap();
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "Next up");

    // Skipping the last track leaves the session idle
    assert_eq!(rig.sessions.skip(SESSION).await.unwrap(), None);
    assert!(matches!(
        rig.sessions.skip(SESSION).await,
        Err(AudioError::NoCurrentTrack)
    ));
}

#[tokio::test]
async fn remove_drops_a_pending_entry() {
    let rig = TestRig::new().await;
    for (n, title) in [(0, "Playing"), (1, "Doomed"), (2, "Survivor")] {
        rig.fetcher.add_track(&source(n), title, 10.0);
    }

    let mut subscriber = rig.subscribe();
    for n in 0..3u8 {
        rig.sessions.enqueue(SESSION, &url(n)).await.unwrap();
    }
    wait_for_started(&mut subscriber, SESSION).await;

    let removed = rig.sessions.remove(SESSION, 1).await.unwrap();
    assert!(removed.contains("Doomed") || removed.contains(&source(1).url));

    let items = rig.sessions.list_queue(SESSION, 10).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].position, 0);
    assert_eq!(items[0].url, source(0).url);
    assert_eq!(items[1].position, 1);
    assert_eq!(items[1].url, source(2).url);

    assert!(matches!(
        rig.sessions.remove(SESSION, 7).await,
        Err(AudioError::NoSuchPosition(7))
    ));
}

#[tokio::test]
async fn clear_keeps_the_playing_track() {
    let rig = TestRig::new().await;
    for n in 0..4u8 {
        rig.fetcher.add_track(&source(n), &format!("Track {n}"), 10.0);
    }

    let mut subscriber = rig.subscribe();
    for n in 0..4u8 {
        rig.sessions.enqueue(SESSION, &url(n)).await.unwrap();
    }
    wait_for_started(&mut subscriber, SESSION).await;

    assert_eq!(rig.sessions.clear(SESSION).await.unwrap(), 3);

    let items = rig.sessions.list_queue(SESSION, 10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].url, source(0).url);
}

#[tokio::test]
async fn listing_an_empty_queue_is_an_error() {
    let rig = TestRig::new().await;

    // Unknown sessions are their own error
    assert!(matches!(
        rig.sessions.list_queue(SESSION, 10).await,
        Err(AudioError::UnknownSession(SESSION))
    ));

    rig.sessions.session(SESSION);
    assert!(matches!(
        rig.sessions.list_queue(SESSION, 10).await,
        Err(AudioError::QueueEmpty)
    ));
}

#[tokio::test]
async fn metadata_prefetch_stays_within_the_horizon() {
    let config = Config {
        prefetch_horizon: 3,
        ..test_config()
    };
    let rig = TestRig::with_config(config).await;
    for n in 0..10u8 {
        rig.fetcher.add_track(&source(n), &format!("Track {n}"), 60.0);
    }

    let mut subscriber = rig.subscribe();
    for n in 0..10u8 {
        rig.sessions.enqueue(SESSION, &url(n)).await.unwrap();
    }
    wait_for_started(&mut subscriber, SESSION).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Ten entries queued, but metadata lookups stay near the horizon. The
    // playing track and the audio-prefetched next track may add a lookup
    // each when they race the horizon ones.
    let meta_calls = rig.fetcher.meta_call_count();
    assert!(meta_calls <= 5, "expected <= 5 metadata calls, got {meta_calls}");

    // Payload downloads cover only the playing and up-next entries
    let audio_calls = rig.fetcher.audio_call_count();
    assert!(audio_calls <= 2, "expected <= 2 audio calls, got {audio_calls}");
}

#[tokio::test]
async fn playlist_input_enqueues_all_entries() {
    let rig = TestRig::new().await;
    for n in 0..3u8 {
        rig.fetcher.add_track(&source(n), &format!("Track {n}"), 10.0);
    }

    let mut subscriber = rig.subscribe();
    rig.sessions
        .enqueue(SESSION, "https://www.youtube.com/playlist?list=PLtest123")
        .await
        .unwrap();
    wait_for_started(&mut subscriber, SESSION).await;

    let items = rig.sessions.list_queue(SESSION, 10).await.unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn queue_resumes_after_running_dry() {
    let rig = TestRig::new().await;
    rig.fetcher.add_track(&source(0), "One shot", 0.1);
    rig.fetcher.add_track(&source(1), "Encore", 0.1);

    let mut subscriber = rig.subscribe();
    let driver = drive_frames(rig.sessions.clone(), SESSION);

    rig.sessions.enqueue(SESSION, &url(0)).await.unwrap();
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "One shot");
    wait_for_event(&mut subscriber, Duration::from_secs(5), |e| {
        matches!(e, Event::TrackFinished { session_id } if *session_id == SESSION)
    })
    .await;

    // A fresh enqueue after the queue drained starts playback again
    rig.sessions.enqueue(SESSION, &url(1)).await.unwrap();
    assert_eq!(wait_for_started(&mut subscriber, SESSION).await, "Encore");

    driver.abort();
}
