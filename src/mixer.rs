//! Pull-based real-time mixer.
//!
//! `next_frame` is called once per transport tick and must return a full
//! frame without blocking, so all state lives behind a std Mutex that is
//! only ever held for short, non-awaiting sections. One track plays at a
//! time; any number of effect clips overlay it. Missing audio mixes as
//! silence rather than stalling the tick.

use crate::buffer::FrameBuffer;
use crate::constants::{FRAME_SIZE_BYTES, SAMPLES_PER_FRAME};
use crate::decode;
use crate::error::AudioError;
use crate::event::{Event, EventBus};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One stereo sample pair, left then right.
pub type Sample = (i16, i16);

/// Peak target for normalisation, just under full scale.
const NORMALISE_TARGET: f64 = 0.997;

pub fn silent_frame() -> Vec<u8> {
    vec![0u8; FRAME_SIZE_BYTES]
}

struct TrackChannel {
    title: String,
    url: String,
    epoch: u64,
    buffer: FrameBuffer,
}

struct EffectChannel {
    name: String,
    samples: Arc<Vec<Sample>>,
    pos: usize,
}

#[derive(Default)]
struct MixerState {
    current: Option<TrackChannel>,
    effects: HashMap<u64, EffectChannel>,
    next_effect_id: u64,
    paused: bool,
}

pub struct Mixer {
    session_id: u64,
    bus: EventBus,
    state: Mutex<MixerState>,
    /// Bumped on every track change so that a slow load for a track the
    /// user already skipped is discarded instead of hijacking the output.
    epoch: AtomicU64,
}

impl Mixer {
    pub fn new(session_id: u64, bus: EventBus) -> Mixer {
        Mixer {
            session_id,
            bus,
            state: Mutex::new(Default::default()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Reserve the output for an upcoming track and return the epoch its
    /// load must present to `set_track`.
    pub fn prepare_track(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_state().current = None;
        epoch
    }

    /// Install a fully loaded track. Returns false when the epoch is stale,
    /// meaning the track was skipped or replaced while loading.
    pub fn set_track(&self, epoch: u64, title: &str, url: &str, samples: &[Sample]) -> bool {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale track load for {url}");
            return false;
        }

        let mut buffer = FrameBuffer::new();
        buffer.push_samples(samples.iter().copied());
        buffer.set_eof();

        let mut state = self.lock_state();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale track load for {url}");
            return false;
        }
        state.current = Some(TrackChannel {
            title: title.to_string(),
            url: url.to_string(),
            epoch,
            buffer,
        });
        state.paused = false;
        true
    }

    /// Drop the playing track without emitting a finish event.
    pub fn stop_track(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.lock_state().current = None;
    }

    /// Start an effect clip, returning its instance id. Clips mix over the
    /// track and over each other; triggering a clip twice plays it twice.
    pub fn play_effect(&self, name: &str, samples: Arc<Vec<Sample>>) -> u64 {
        let mut state = self.lock_state();
        let id = state.next_effect_id;
        state.next_effect_id += 1;
        state.effects.insert(
            id,
            EffectChannel {
                name: name.to_string(),
                samples,
                pos: 0,
            },
        );
        id
    }

    pub fn pause(&self) {
        self.lock_state().paused = true;
    }

    pub fn resume(&self) {
        self.lock_state().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().paused
    }

    pub fn has_track(&self) -> bool {
        self.lock_state().current.is_some()
    }

    pub fn current_title(&self) -> Option<String> {
        self.lock_state()
            .current
            .as_ref()
            .map(|t| t.title.clone())
    }

    pub fn active_effects(&self) -> usize {
        self.lock_state().effects.len()
    }

    pub fn clear_effects(&self) {
        self.lock_state().effects.clear();
    }

    /// Produce the next 20ms output frame. Never blocks: with nothing to
    /// play (or while paused) the frame is silence.
    pub fn next_frame(&self) -> Vec<u8> {
        let mut finished: Option<TrackChannel> = None;
        let frame = {
            let mut state = self.lock_state();
            if state.paused {
                return silent_frame();
            }

            let mut acc = vec![(0i32, 0i32); SAMPLES_PER_FRAME];

            let mut track_done = false;
            if let Some(track) = &mut state.current {
                for (slot, (l, r)) in acc.iter_mut().zip(track.buffer.pull_frame(SAMPLES_PER_FRAME))
                {
                    slot.0 += l as i32;
                    slot.1 += r as i32;
                }
                track_done = track.buffer.is_exhausted();
            }
            if track_done {
                finished = state.current.take();
            }

            let mut done = Vec::new();
            for (id, effect) in &mut state.effects {
                let end = (effect.pos + SAMPLES_PER_FRAME).min(effect.samples.len());
                for (slot, (l, r)) in acc.iter_mut().zip(effect.samples[effect.pos..end].iter()) {
                    slot.0 += *l as i32;
                    slot.1 += *r as i32;
                }
                effect.pos = end;
                if end >= effect.samples.len() {
                    done.push(*id);
                }
            }
            for id in done {
                if let Some(effect) = state.effects.remove(&id) {
                    debug!("Effect {} finished", effect.name);
                }
            }

            let mut out = Vec::with_capacity(FRAME_SIZE_BYTES);
            for (l, r) in acc {
                let _ = out.write_i16::<LittleEndian>(clamp_i32(l));
                let _ = out.write_i16::<LittleEndian>(clamp_i32(r));
            }
            out
        };

        // Events go out after the lock is released
        if let Some(track) = finished {
            if self.epoch.load(Ordering::SeqCst) == track.epoch {
                info!("Track finished: {} ({})", track.title, track.url);
                self.bus.send(Event::TrackFinished {
                    session_id: self.session_id,
                });
            }
        }

        frame
    }

    fn lock_state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn clamp_i32(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Read a cached PCM payload from disk, optionally normalising its level.
pub async fn load_samples(path: PathBuf, normalise: bool) -> Result<Vec<Sample>, AudioError> {
    tokio::task::spawn_blocking(move || {
        let raw = std::fs::read(&path).map_err(|e| {
            AudioError::FetchUnavailable(format!("cached audio missing at {}: {e}", path.display()))
        })?;
        let mut samples = decode::bytes_to_samples(&raw);
        if normalise {
            let factor = normalisation_factor(&samples);
            if factor != 1.0 {
                apply_gain(&mut samples, factor);
            }
        }
        Ok(samples)
    })
    .await
    .map_err(|e| AudioError::DecodeError(format!("sample load task panicked: {e}")))?
}

/// Gain that brings three standard deviations of the signal to the peak
/// target. Robust against one-off spikes that would defeat peak scaling.
pub fn normalisation_factor(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 1.0;
    }

    let n = (samples.len() * 2) as f64;
    let mean = samples
        .iter()
        .map(|(l, r)| l.unsigned_abs() as f64 + r.unsigned_abs() as f64)
        .sum::<f64>()
        / n;
    let variance = samples
        .iter()
        .flat_map(|(l, r)| [l.unsigned_abs() as f64, r.unsigned_abs() as f64])
        .map(|s| (s - mean).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    let spread = mean + 3.0 * std_dev;
    if spread < 1.0 {
        return 1.0;
    }

    let factor = NORMALISE_TARGET * i16::MAX as f64 / spread;
    // Never attenuate below unity on quiet input beyond a sane boost ceiling
    factor.clamp(0.05, 20.0)
}

pub fn apply_gain(samples: &mut [Sample], factor: f64) {
    for (l, r) in samples.iter_mut() {
        *l = (*l as f64 * factor).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        *r = (*r as f64 * factor).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    }
}
