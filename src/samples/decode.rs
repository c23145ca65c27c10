// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Decoding raw sample bytes into playable PCM.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

/// Error types for decoding.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Audio decode error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("Invalid audio: {0}")]
    Invalid(String),
}

/// Decoded audio held in memory. The data is shared by reference, so clones are cheap
/// and every voice playing the sample reads the same buffer.
#[derive(Clone)]
pub struct DecodedSample {
    /// Interleaved f32 samples.
    data: Arc<Vec<f32>>,
    channel_count: u16,
    sample_rate: u32,
}

impl DecodedSample {
    /// Creates a decoded sample from interleaved data.
    pub fn from_interleaved(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// Returns the interleaved sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Iterates over one channel of the sample.
    pub fn channel(&self, channel: u16) -> impl Iterator<Item = f32> + '_ {
        let channels = self.channel_count as usize;
        let channel = (channel as usize).min(channels - 1);
        self.data.iter().skip(channel).step_by(channels).copied()
    }

    /// Returns true if both handles share the same underlying buffer.
    pub fn ptr_eq(&self, other: &DecodedSample) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for DecodedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedSample")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Turns fetched bytes into PCM.
pub trait SampleDecoder: Send + Sync + 'static {
    /// Decodes the bytes. The hint is the source's file extension, if any.
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<DecodedSample, DecodeError>;
}

/// Decodes anything symphonia understands and converts it to the output sample rate.
pub struct SymphoniaDecoder {
    target_sample_rate: u32,
}

impl SymphoniaDecoder {
    pub fn new(target_sample_rate: u32) -> SymphoniaDecoder {
        SymphoniaDecoder { target_sample_rate }
    }
}

impl SampleDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<DecodedSample, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(extension) = hint {
            probe_hint.with_extension(extension);
        }

        let probed = get_probe().format(
            &probe_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Invalid("No audio track found".to_string()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channel_count = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channel_count = spec.channels.count() as u16;

                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // A single corrupt packet isn't fatal for a one-shot.
                    warn!(error = e, "Skipping undecodable packet");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if channel_count == 0 || sample_rate == 0 {
            return Err(DecodeError::Invalid(
                "Unable to determine channels or sample rate".to_string(),
            ));
        }

        let samples = if sample_rate != self.target_sample_rate {
            debug!(
                source_rate = sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(&samples, channel_count, sample_rate, self.target_sample_rate)
        } else {
            samples
        };

        Ok(DecodedSample::from_interleaved(
            samples,
            channel_count,
            self.target_sample_rate,
        ))
    }
}

/// Transcodes samples from one sample rate to another using linear interpolation.
/// Linear interpolation is sufficient for drum hits and one-shots.
pub fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count.max(1) as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}
