//! Test infrastructure for mixbot-rs integration tests.
//!
//! Provides a scripted fetch backend, fixture audio generation, and a
//! harness wiring a real cache, fetch pool, and session registry onto a
//! temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// Re-export key types from the main crate
pub use mixbot_rs::cache::AudioCache;
pub use mixbot_rs::config::Config;
pub use mixbot_rs::effects::EffectLibrary;
pub use mixbot_rs::error::AudioError;
pub use mixbot_rs::event::{Event, EventBus, Subscriber};
pub use mixbot_rs::fetch::{FetchPool, FetchedAudio, Fetcher};
pub use mixbot_rs::mixer::Sample;
pub use mixbot_rs::session::Sessions;
pub use mixbot_rs::source::{SourceRef, TrackMetadata};

/// Render stereo samples as an in-memory WAV payload, the format the
/// scripted backend serves to the decoder.
pub fn wav_bytes(samples: &[Sample]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for (l, r) in samples {
        writer.write_sample(*l).unwrap();
        writer.write_sample(*r).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

/// A constant-amplitude stereo clip of the given length.
pub fn constant_clip(value: i16, seconds: f64) -> Vec<Sample> {
    vec![(value, value); (48_000.0 * seconds) as usize]
}

/// Valid video ids for test sources: `vid(0)` .. `vid(9)`.
pub fn vid(n: u8) -> String {
    format!("testvideo{:02}", n % 100)
}

pub fn source(n: u8) -> SourceRef {
    SourceRef::from_video_id(&vid(n)).unwrap()
}

pub fn url(n: u8) -> String {
    source(n).url
}

struct ScriptedTrack {
    title: String,
    duration_secs: u64,
    payload: Vec<u8>,
    /// Errors served before the payload, in order.
    audio_failures: Vec<AudioError>,
}

#[derive(Default)]
struct MockState {
    tracks: HashMap<String, ScriptedTrack>,
}

/// Scripted fetch backend. Serves WAV payloads from memory, counts backend
/// calls, and can fail a configurable number of times per source.
#[derive(Default)]
pub struct MockFetcher {
    state: Mutex<MockState>,
    pub audio_calls: AtomicUsize,
    pub meta_calls: AtomicUsize,
    /// Artificial latency per audio download, to widen race windows.
    pub audio_delay: Mutex<Duration>,
}

impl MockFetcher {
    pub fn new() -> Arc<MockFetcher> {
        Arc::new(MockFetcher::default())
    }

    /// Register a track with a short constant-amplitude payload.
    pub fn add_track(&self, source: &SourceRef, title: &str, seconds: f64) {
        self.add_track_samples(source, title, &constant_clip(1000, seconds));
    }

    pub fn add_track_samples(&self, source: &SourceRef, title: &str, samples: &[Sample]) {
        let mut state = self.state.lock().unwrap();
        state.tracks.insert(
            source.id.clone(),
            ScriptedTrack {
                title: title.to_string(),
                duration_secs: (samples.len() / 48_000) as u64,
                payload: wav_bytes(samples),
                audio_failures: Vec::new(),
            },
        );
    }

    /// Queue an error to be served before the payload on subsequent
    /// `fetch_audio` calls for this source.
    pub fn fail_audio_once(&self, source: &SourceRef, error: AudioError) {
        let mut state = self.state.lock().unwrap();
        let track = state
            .tracks
            .get_mut(&source.id)
            .expect("fail_audio_once on unregistered track");
        track.audio_failures.push(error);
    }

    pub fn set_audio_delay(&self, delay: Duration) {
        *self.audio_delay.lock().unwrap() = delay;
    }

    pub fn audio_call_count(&self) -> usize {
        self.audio_calls.load(Ordering::SeqCst)
    }

    pub fn meta_call_count(&self) -> usize {
        self.meta_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_metadata(&self, source: &SourceRef) -> Result<TrackMetadata, AudioError> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let track = state
            .tracks
            .get(&source.id)
            .ok_or_else(|| AudioError::FetchUnavailable(format!("no such track: {}", source.id)))?;
        Ok(TrackMetadata {
            url: source.url.clone(),
            title: track.title.clone(),
            duration_secs: track.duration_secs,
        })
    }

    async fn fetch_audio(&self, source: &SourceRef) -> Result<FetchedAudio, AudioError> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.audio_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let track = state
            .tracks
            .get_mut(&source.id)
            .ok_or_else(|| AudioError::FetchUnavailable(format!("no such track: {}", source.id)))?;

        if !track.audio_failures.is_empty() {
            return Err(track.audio_failures.remove(0));
        }

        Ok(FetchedAudio {
            data: track.payload.clone(),
            extension: Some("wav".to_string()),
        })
    }

    async fn search(&self, terms: &str) -> Result<SourceRef, AudioError> {
        // Search resolves to the first registered track, enough for tests
        let state = self.state.lock().unwrap();
        let mut ids: Vec<&String> = state.tracks.keys().collect();
        ids.sort();
        ids.first()
            .map(|id| SourceRef::from_video_id(id).unwrap())
            .ok_or_else(|| AudioError::FetchUnavailable(format!("no results for: {terms}")))
    }

    async fn playlist_entries(&self, _url: &str) -> Result<Vec<SourceRef>, AudioError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<&String> = state.tracks.keys().collect();
        ids.sort();
        Ok(ids
            .iter()
            .map(|id| SourceRef::from_video_id(id).unwrap())
            .collect())
    }
}

/// Test configuration tuned for fast, deterministic runs.
pub fn test_config() -> Config {
    Config {
        fetch_workers: 4,
        prefetch_horizon: 10,
        fetch_timeout_secs: 10,
        fetch_retries: 2,
        normalise_audio: false,
        ..Config::default()
    }
}

/// Harness wiring a real cache and pool to the scripted backend in a
/// temporary directory.
pub struct TestRig {
    pub fetcher: Arc<MockFetcher>,
    pub cache: Arc<AudioCache>,
    pub pool: Arc<FetchPool>,
    pub sessions: Arc<Sessions>,
    pub bus: EventBus,
    _tmp: TempDir,
}

impl TestRig {
    pub async fn new() -> TestRig {
        TestRig::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> TestRig {
        TestRig::build(config, EffectLibrary::empty()).await
    }

    pub async fn with_effects(effects: EffectLibrary) -> TestRig {
        TestRig::build(test_config(), effects).await
    }

    async fn build(config: Config, effects: EffectLibrary) -> TestRig {
        let tmp = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        let cache = Arc::new(AudioCache::open(tmp.path()).await.unwrap());
        let pool = FetchPool::new(cache.clone(), fetcher.clone(), &config);
        let bus = EventBus::new();
        let sessions = Sessions::new(
            cache.clone(),
            pool.clone(),
            Arc::new(effects),
            bus.clone(),
            config,
        );

        TestRig {
            fetcher,
            cache,
            pool,
            sessions,
            bus,
            _tmp: tmp,
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        self.bus.subscribe()
    }
}

/// Parse a raw s16le output frame back into stereo samples.
pub fn frame_samples(frame: &[u8]) -> Vec<Sample> {
    assert_eq!(frame.len() % 4, 0, "frame is not whole stereo s16le samples");
    frame
        .chunks_exact(4)
        .map(|b| {
            (
                i16::from_le_bytes([b[0], b[1]]),
                i16::from_le_bytes([b[2], b[3]]),
            )
        })
        .collect()
}

/// Pull mixer frames much faster than real time so playback-driven
/// transitions happen quickly in tests. Aborts with its handle.
pub fn drive_frames(sessions: Arc<Sessions>, session_id: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sessions.next_frame(session_id);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

/// Wait until an event matching the predicate arrives, panicking on
/// timeout. Non-matching events are discarded.
pub async fn wait_for_event<F>(subscriber: &mut Subscriber, timeout: Duration, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    let wait = async {
        loop {
            let event = subscriber.recv().await;
            if pred(&event) {
                break event;
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .expect("timed out waiting for event")
}

/// Wait for a `TrackStarted` in the session and return its title.
pub async fn wait_for_started(subscriber: &mut Subscriber, session_id: u64) -> String {
    let event = wait_for_event(subscriber, Duration::from_secs(5), |e| {
        matches!(e, Event::TrackStarted { session_id: s, .. } if *s == session_id)
    })
    .await;
    match event {
        Event::TrackStarted { title, .. } => title,
        _ => unreachable!(),
    }
}
