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
// Core audio mixing logic shared by the cpal and mock devices.
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::graph::Voice;
use crate::clock::AudioClock;

/// Sends voices to the mixer. Safe to use from any thread, never blocks.
pub type SourceSender = crossbeam_channel::Sender<Voice>;

/// Sums scheduled voices into an interleaved output block, applies the master gain and
/// keeps the running frame count that serves as the audio clock.
#[derive(Clone)]
pub struct AudioMixer {
    state: Arc<MixerState>,
}

struct MixerState {
    num_channels: u16,
    sample_rate: u32,
    /// Only the render thread takes this lock.
    voices: Mutex<Vec<Voice>>,
    source_tx: SourceSender,
    source_rx: crossbeam_channel::Receiver<Voice>,
    /// Frames rendered so far.
    frames_rendered: AtomicU64,
    /// f32 bits.
    master_gain: AtomicU32,
    /// f32 bits, peak absolute level of the most recent block.
    peak: AtomicU32,
}

impl AudioMixer {
    /// Creates a new audio mixer.
    pub fn new(num_channels: u16, sample_rate: u32) -> Self {
        let (source_tx, source_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(MixerState {
                num_channels: num_channels.max(1),
                sample_rate: sample_rate.max(1),
                voices: Mutex::new(Vec::new()),
                source_tx,
                source_rx,
                frames_rendered: AtomicU64::new(0),
                master_gain: AtomicU32::new(1.0f32.to_bits()),
                peak: AtomicU32::new(0.0f32.to_bits()),
            }),
        }
    }

    /// Returns a sender for new voices. Voices are picked up at the start of the next block.
    pub fn source_sender(&self) -> SourceSender {
        self.state.source_tx.clone()
    }

    /// Gets the number of output channels
    pub fn num_channels(&self) -> u16 {
        self.state.num_channels
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.state.sample_rate
    }

    /// The number of frames rendered so far.
    pub fn current_frame(&self) -> u64 {
        self.state.frames_rendered.load(Ordering::Acquire)
    }

    /// Converts an audio clock time in seconds to an output frame.
    pub fn frame_at(&self, time: f64) -> u64 {
        if !time.is_finite() || time <= 0.0 {
            return 0;
        }
        (time * self.state.sample_rate as f64).round() as u64
    }

    pub fn set_master_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        self.state
            .master_gain
            .store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.state.master_gain.load(Ordering::Relaxed))
    }

    /// The peak absolute level of the most recently rendered block, after master gain.
    pub fn peak_level(&self) -> f32 {
        f32::from_bits(self.state.peak.load(Ordering::Relaxed))
    }

    /// The number of voices currently held by the mixer.
    pub fn active_voices(&self) -> usize {
        self.state.voices.lock().len()
    }

    /// Renders one block into the interleaved output buffer. The buffer length determines
    /// the number of frames.
    pub fn process_into_output(&self, output: &mut [f32]) {
        let num_channels = self.state.num_channels as usize;
        let frames = output.len() / num_channels;
        output.fill(0.0);

        let block_start = self.state.frames_rendered.load(Ordering::Acquire);
        let mut voices = self.state.voices.lock();
        while let Ok(voice) = self.state.source_rx.try_recv() {
            voices.push(voice);
        }

        voices.retain_mut(|voice| {
            voice.render(output, num_channels, block_start);
            if voice.is_finished() {
                debug!(voice = voice.id(), "Voice finished");
                false
            } else {
                true
            }
        });
        drop(voices);

        let master_gain = self.master_gain();
        let mut peak = 0.0f32;
        for sample in output.iter_mut() {
            *sample *= master_gain;
            peak = peak.max(sample.abs());
        }
        self.state.peak.store(peak.to_bits(), Ordering::Relaxed);

        self.state
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Release);
    }

    /// Processes multiple frames of audio mixing
    pub fn process_frames(&self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0f32; num_frames * self.state.num_channels as usize];
        self.process_into_output(&mut frames);
        frames
    }
}

impl AudioClock for AudioMixer {
    fn now(&self) -> f64 {
        self.current_frame() as f64 / self.state.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::{NoteParams, PlaybackGraph};
    use crate::samples::DecodedSample;
    use crate::testutil::calculate_rms;

    fn voice(data: Vec<f32>, start_frame: u64) -> Voice {
        PlaybackGraph::build(
            DecodedSample::from_interleaved(data, 1, 44100),
            NoteParams::new(1.0, None),
            start_frame,
        )
    }

    #[test]
    fn test_basic_mixing() {
        let mixer = AudioMixer::new(2, 44100);
        mixer.source_sender().send(voice(vec![0.5, 0.8], 0)).unwrap();

        let frames = mixer.process_frames(2);

        assert_eq!(frames, vec![0.5, 0.5, 0.8, 0.8]);
    }

    #[test]
    fn test_multiple_voice_mixing() {
        let mixer = AudioMixer::new(2, 44100);
        let tx = mixer.source_sender();
        tx.send(voice(vec![0.5, 0.3], 0)).unwrap();
        tx.send(voice(vec![0.2, 0.1], 0)).unwrap();

        let frames = mixer.process_frames(2);

        assert!((frames[0] - 0.7).abs() < 1e-6);
        assert!((frames[2] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_start_frame_accuracy() {
        let mixer = AudioMixer::new(1, 44100);
        mixer.source_sender().send(voice(vec![1.0; 4], 100)).unwrap();

        // Render in odd sized blocks so the start lands mid-block.
        let mut rendered = Vec::new();
        for _ in 0..5 {
            rendered.extend(mixer.process_frames(33));
        }

        let first = rendered.iter().position(|s| *s != 0.0);
        assert_eq!(Some(100), first);
        assert_eq!(4, rendered.iter().filter(|s| **s != 0.0).count());
    }

    #[test]
    fn test_clock_follows_rendered_frames() {
        let mixer = AudioMixer::new(2, 48000);
        assert_eq!(0.0, mixer.now());

        mixer.process_frames(24000);
        assert_eq!(24000, mixer.current_frame());
        assert!((mixer.now() - 0.5).abs() < 1e-9);
        assert_eq!(24000, mixer.frame_at(0.5));
        assert_eq!(0, mixer.frame_at(-1.0));
    }

    #[test]
    fn test_master_gain_and_peak() {
        let mixer = AudioMixer::new(2, 44100);
        mixer.set_master_gain(0.5);
        mixer.source_sender().send(voice(vec![0.8; 64], 0)).unwrap();

        let frames = mixer.process_frames(64);

        assert!((calculate_rms(&frames) - 0.4).abs() < 1e-6);
        assert!((mixer.peak_level() - 0.4).abs() < 1e-6);

        mixer.set_master_gain(-3.0);
        assert_eq!(0.0, mixer.master_gain());
    }

    #[test]
    fn test_finished_voices_are_dropped() {
        let mixer = AudioMixer::new(2, 44100);
        mixer.source_sender().send(voice(vec![1.0; 10], 0)).unwrap();
        mixer.source_sender().send(voice(vec![1.0; 10], 1000)).unwrap();

        mixer.process_frames(16);
        assert_eq!(1, mixer.active_voices());

        mixer.process_frames(2000);
        assert_eq!(0, mixer.active_voices());
        assert_eq!(0.0, mixer.process_frames(16).iter().sum::<f32>());
        assert_eq!(0.0, mixer.peak_level());
    }
}
