//! Symphonia-backed decoding into the pipeline's canonical audio format.
//!
//! Every contributor to the mixer (tracks and effect clips alike) goes
//! through here first, so all sources are comparable sample-for-sample:
//! 48kHz stereo interleaved i16, resampled and rechanneled as needed.

use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;
use crate::mixer::Sample;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use rubato::{FftFixedIn, Resampler};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Decode a raw container payload (m4a, ogg, wav, mp3, ...) held in memory.
pub fn decode_bytes(data: Vec<u8>, extension: Option<&str>) -> Result<Vec<Sample>, AudioError> {
    let source = Box::new(ReadOnlySource::new(Cursor::new(data))) as Box<dyn MediaSource>;
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    decode_stream(mss, hint)
}

/// Decode an audio file on disk (used for effect clips).
pub fn decode_file(path: &Path) -> Result<Vec<Sample>, AudioError> {
    let file = File::open(path)
        .map_err(|e| AudioError::DecodeError(format!("failed to open {}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_stream(mss, hint)
}

fn decode_stream(mss: MediaSourceStream, hint: Hint) -> Result<Vec<Sample>, AudioError> {
    let format_opts: FormatOptions = Default::default();
    let metadata_opts: MetadataOptions = Default::default();
    let decoder_opts: DecoderOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| AudioError::DecodeError(format!("unrecognized audio format: {e}")))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::DecodeError("no audio tracks in payload".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| AudioError::DecodeError(format!("unsupported codec: {e}")))?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut rate = SAMPLE_RATE;
    let mut left: Vec<f32> = Vec::new();
    let mut right: Vec<f32> = Vec::new();

    loop {
        // Symphonia reports UnexpectedEof even for a well-formed end of stream
        let packet = match format.next_packet() {
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AudioError::DecodeError(format!("demux error: {e}"))),
            Ok(packet) => packet,
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(buf) => buf,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // A single bad packet is recoverable; skip it
                debug!("Skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(AudioError::DecodeError(format!("decode error: {e}"))),
        };

        let spec = *audio_buf.spec();
        let channels = spec.channels.count().max(1);
        let needed = (audio_buf.capacity() * channels) as u64;

        let recreate = sample_buf
            .as_ref()
            .map_or(true, |buf| (buf.capacity() as u64) < needed);
        if recreate {
            rate = spec.rate;
            sample_buf = Some(SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
        }

        if let Some(buf) = &mut sample_buf {
            buf.copy_interleaved_ref(audio_buf);

            if channels == 1 {
                for &s in buf.samples() {
                    left.push(s);
                    right.push(s);
                }
            } else {
                // Down-mix anything beyond stereo by taking the front pair
                for frame in buf.samples().chunks_exact(channels) {
                    left.push(frame[0]);
                    right.push(frame[1]);
                }
            }
        }
    }

    if left.is_empty() {
        return Err(AudioError::DecodeError("no samples decoded".to_string()));
    }

    if rate == SAMPLE_RATE {
        Ok(interleave(&left, &right))
    } else {
        resample_stereo(&left, &right, rate)
    }
}

/// Resample planar stereo f32 audio to the pipeline's output rate.
fn resample_stereo(left: &[f32], right: &[f32], from_rate: u32) -> Result<Vec<Sample>, AudioError> {
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        SAMPLE_RATE as usize,
        RESAMPLER_CHUNK_SIZE,
        2, // sub-chunks
        2, // stereo
    )
    .map_err(|e| AudioError::DecodeError(format!("failed to create resampler: {e}")))?;

    let chunk_size = resampler.input_frames_max();
    let estimated = (left.len() as u64 * SAMPLE_RATE as u64 / from_rate as u64) as usize;
    let mut out: Vec<Sample> = Vec::with_capacity(estimated);

    let mut pos = 0;
    while pos < left.len() {
        let end = (pos + chunk_size).min(left.len());

        // Pad the tail chunk with silence to the resampler's fixed input size
        let mut l = left[pos..end].to_vec();
        let mut r = right[pos..end].to_vec();
        l.resize(chunk_size, 0.0);
        r.resize(chunk_size, 0.0);

        let resampled = resampler
            .process(&[l, r], None)
            .map_err(|e| AudioError::DecodeError(format!("resampling failed: {e}")))?;

        for (l, r) in resampled[0].iter().zip(resampled[1].iter()) {
            out.push((to_i16(*l), to_i16(*r)));
        }

        pos = end;
    }

    Ok(out)
}

fn interleave(left: &[f32], right: &[f32]) -> Vec<Sample> {
    left.iter()
        .zip(right.iter())
        .map(|(&l, &r)| (to_i16(l), to_i16(r)))
        .collect()
}

// Full-scale is 32768 so that s16 payloads survive the f32 round trip
// bit-exactly; the positive edge clamps to i16::MAX.
fn to_i16(s: f32) -> i16 {
    (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Serialize stereo samples as interleaved s16le, the canonical on-disk
/// cache representation.
pub fn samples_to_bytes(samples: &[Sample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for (l, r) in samples {
        let _ = out.write_i16::<LittleEndian>(*l);
        let _ = out.write_i16::<LittleEndian>(*r);
    }
    out
}

/// Parse an interleaved s16le payload back into stereo samples.
pub fn bytes_to_samples(data: &[u8]) -> Vec<Sample> {
    let mut reader = Cursor::new(data);
    let mut raw: Vec<i16> = Vec::with_capacity(data.len() / 2);
    while let Ok(value) = reader.read_i16::<LittleEndian>() {
        raw.push(value);
    }
    raw.into_iter().tuples().collect()
}
