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

//! One-shot signal paths for triggered notes.
//!
//! Every trigger gets a fresh [`Voice`]: the decoded buffer as its source, an optional
//! stereo pan stage and a gain stage. Master gain and the analysis tap are applied by
//! the mixer to the sum of all voices.

use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::samples::DecodedSample;

static VOICE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-note parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteParams {
    /// Linear gain, track volume times step velocity.
    pub gain: f32,
    /// Stereo position in [-1, 1]. No pan stage is built when this is None.
    pub pan: Option<f32>,
}

impl NoteParams {
    pub fn new(gain: f32, pan: Option<f32>) -> NoteParams {
        NoteParams { gain, pan }
    }
}

/// Builds voices.
pub struct PlaybackGraph {}

impl PlaybackGraph {
    /// Builds a fresh voice for the buffer that starts at the given output frame.
    pub fn build(buffer: DecodedSample, params: NoteParams, start_frame: u64) -> Voice {
        let source_channels = (buffer.channel_count() as usize).min(2);
        let routing = routing(source_channels, &params);

        Voice {
            id: VOICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            buffer,
            start_frame,
            position: 0,
            source_channels,
            routing,
        }
    }
}

/// A single playing note.
pub struct Voice {
    id: u64,
    buffer: DecodedSample,
    start_frame: u64,
    /// Frames consumed from the buffer.
    position: usize,
    source_channels: usize,
    /// routing[source channel][left, right], gain included.
    routing: [[f32; 2]; 2],
}

impl Voice {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.buffer.frames()
    }

    /// Gains from each source channel to the left and right outputs.
    pub fn routing(&self) -> [[f32; 2]; 2] {
        self.routing
    }

    /// Mixes the voice into an interleaved block whose first frame is `block_start`. A
    /// voice whose start frame has already passed starts at the top of the block.
    pub(crate) fn render(&mut self, output: &mut [f32], num_channels: usize, block_start: u64) {
        let num_channels = num_channels.max(1);
        let frames = output.len() / num_channels;
        let block_end = block_start + frames as u64;
        if self.start_frame >= block_end {
            return;
        }

        let offset = self.start_frame.saturating_sub(block_start) as usize;
        let data = self.buffer.data();
        let stride = self.buffer.channel_count() as usize;
        let total_frames = self.buffer.frames();

        for frame in output.chunks_exact_mut(num_channels).skip(offset) {
            if self.position >= total_frames {
                break;
            }

            let base = self.position * stride;
            let first = data[base];
            let second = if self.source_channels > 1 {
                data[base + 1]
            } else {
                0.0
            };
            let left = first * self.routing[0][0] + second * self.routing[1][0];
            let right = first * self.routing[0][1] + second * self.routing[1][1];

            if num_channels == 1 {
                frame[0] += (left + right) * 0.5;
            } else {
                frame[0] += left;
                frame[1] += right;
            }
            self.position += 1;
        }
    }
}

/// Equal-power gains for a position x in [0, 1].
fn equal_power(x: f32) -> (f32, f32) {
    ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin())
}

fn routing(source_channels: usize, params: &NoteParams) -> [[f32; 2]; 2] {
    let matrix = match (source_channels, params.pan) {
        (1, None) => [[1.0, 1.0], [0.0, 0.0]],
        (_, None) => [[1.0, 0.0], [0.0, 1.0]],
        (1, Some(pan)) => {
            let (left, right) = equal_power((pan.clamp(-1.0, 1.0) + 1.0) / 2.0);
            [[left, right], [0.0, 0.0]]
        }
        (_, Some(pan)) => {
            let pan = pan.clamp(-1.0, 1.0);
            if pan <= 0.0 {
                // Right folds into left.
                let (to_left, to_right) = equal_power(pan + 1.0);
                [[1.0, 0.0], [to_left, to_right]]
            } else {
                // Left folds into right.
                let (to_left, to_right) = equal_power(pan);
                [[to_left, to_right], [0.0, 1.0]]
            }
        }
    };

    let gain = params.gain.max(0.0);
    matrix.map(|row| row.map(|g| g * gain))
}
