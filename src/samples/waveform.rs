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
use super::decode::DecodedSample;

/// Default number of points in a waveform summary.
pub const DEFAULT_WAVEFORM_POINTS: usize = 100;

/// Summarizes the first channel of a buffer as `points` mean absolute amplitudes, one
/// per equally sized block. Trailing frames that don't fill a block are ignored. If the
/// buffer is shorter than `points`, every point is zero.
pub fn generate_waveform_data(buffer: &DecodedSample, points: usize) -> Vec<f32> {
    if points == 0 {
        return Vec::new();
    }

    let channel: Vec<f32> = buffer.channel(0).collect();
    let block_size = channel.len() / points;
    if block_size == 0 {
        return vec![0.0; points];
    }

    channel
        .chunks_exact(block_size)
        .take(points)
        .map(|block| block.iter().map(|s| s.abs()).sum::<f32>() / block_size as f32)
        .collect()
}
