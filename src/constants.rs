// Fixed output format shared by every audio path in the pipeline
pub const SAMPLE_RATE: u32 = 48000; // 48 kHz sample rate
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 2; // Stereo channel

/// Length of one transport tick worth of audio.
pub const FRAME_DURATION_MS: u64 = 20;

/// Stereo sample pairs per output frame (960 at 48kHz / 20ms).
pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// Size of one s16le stereo output frame in bytes.
pub const FRAME_SIZE_BYTES: usize = SAMPLES_PER_FRAME * CHANNELS as usize * (BIT_DEPTH as usize / 8);
