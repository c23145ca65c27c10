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
use std::any::Any;
use std::{error::Error, fmt, sync::Arc, thread};

use tracing::{info, warn};

use crate::config;
use crate::playsync::CancelHandle;

pub mod cpal;
pub mod graph;
pub mod mixer;
pub mod mock;
mod thread_priority;

pub use graph::{NoteParams, PlaybackGraph, Voice};
pub use mixer::{AudioMixer, SourceSender};

pub trait Device: Any + fmt::Display + Send + Sync {
    /// Starts rendering the mixer to the device. Output continues until the returned
    /// handle is stopped or dropped.
    fn start(&self, mixer: AudioMixer) -> Result<OutputHandle, Box<dyn Error>>;
}

/// Keeps a device's output threads alive.
pub struct OutputHandle {
    device: String,
    cancel_handle: CancelHandle,
    threads: Vec<thread::JoinHandle<()>>,
}

impl OutputHandle {
    pub fn new(
        device: &str,
        cancel_handle: CancelHandle,
        threads: Vec<thread::JoinHandle<()>>,
    ) -> OutputHandle {
        OutputHandle {
            device: device.to_string(),
            cancel_handle,
            threads,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_handle.is_cancelled()
    }

    /// Stops output and waits for the device threads to exit.
    pub fn stop(&mut self) {
        self.cancel_handle.cancel();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!(device = self.device, "Output thread panicked");
            }
        }
        info!(device = self.device, "Audio output stopped");
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the configured device. Names starting with "mock" select the mock device.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(device)?))
}
