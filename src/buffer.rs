//! Sample buffer feeding the mixer's tick path.
//!
//! A loader pushes decoded samples in, the mixer pulls fixed-size frames
//! out. Pulls past the available data pad with silence so a frame is always
//! full-length.

use crate::mixer::Sample;
use std::collections::VecDeque;

#[derive(Default)]
pub struct FrameBuffer {
    samples: VecDeque<Sample>,
    eof: bool,
    /// Samples consumed so far, for playback position tracking.
    consumed: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_samples<I: IntoIterator<Item = Sample>>(&mut self, samples: I) {
        self.samples.extend(samples);
    }

    /// Pull exactly `count` samples, padding with silence when fewer are
    /// available.
    pub fn pull_frame(&mut self, count: usize) -> Vec<Sample> {
        let available = self.samples.len().min(count);
        let mut frame: Vec<Sample> = self.samples.drain(..available).collect();
        self.consumed += available;
        frame.resize(count, (0, 0));
        frame
    }

    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// True once the producer is done and every sample has been pulled.
    pub fn is_exhausted(&self) -> bool {
        self.eof && self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn position_secs(&self, sample_rate: u32) -> f64 {
        self.consumed as f64 / sample_rate as f64
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.eof = false;
        self.consumed = 0;
    }
}
