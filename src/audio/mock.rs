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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{info, span, Level};

use super::{mixer::AudioMixer, OutputHandle};
use crate::playsync::CancelHandle;

/// Frames rendered per block by the mock device.
const BLOCK_FRAMES: usize = 256;

/// How often the render thread wakes up.
const WAKE_INTERVAL: Duration = Duration::from_millis(5);

/// A mock device. Renders the mixer in real time and discards the output.
#[derive(Clone)]
pub struct Device {
    name: String,
    is_playing: Arc<AtomicBool>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            is_playing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if the device is currently rendering.
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }
}

impl super::Device for Device {
    fn start(&self, mixer: AudioMixer) -> Result<OutputHandle, Box<dyn Error>> {
        info!(
            device = self.name,
            channels = mixer.num_channels(),
            sample_rate = mixer.sample_rate(),
            "Starting mock audio output"
        );

        let cancel_handle = CancelHandle::new();
        let is_playing = self.is_playing.clone();
        let name = self.name.clone();
        let render_thread = {
            let cancel_handle = cancel_handle.clone();
            thread::Builder::new()
                .name(format!("{}-render", name))
                .spawn(move || {
                    let span = span!(Level::INFO, "mock output", device = name);
                    let _enter = span.enter();

                    let sample_rate = mixer.sample_rate() as f64;
                    let mut scratch = vec![0.0f32; BLOCK_FRAMES * mixer.num_channels() as usize];
                    // The mixer may have rendered in an earlier session.
                    let base = mixer.current_frame();
                    let started = Instant::now();
                    is_playing.store(true, Ordering::Relaxed);

                    // Keep the rendered frame count in step with the wall clock.
                    while !cancel_handle.wait_timeout(WAKE_INTERVAL) {
                        let due = base + (started.elapsed().as_secs_f64() * sample_rate) as u64;
                        while mixer.current_frame() + (BLOCK_FRAMES as u64) <= due {
                            mixer.process_into_output(&mut scratch);
                        }
                    }

                    is_playing.store(false, Ordering::Relaxed);
                })?
        };

        Ok(OutputHandle::new(
            &self.name,
            cancel_handle,
            vec![render_thread],
        ))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
