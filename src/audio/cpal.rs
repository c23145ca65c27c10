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
use std::{error::Error, fmt, sync::mpsc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use super::mixer::AudioMixer;
use super::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use super::{Device as AudioDevice, OutputHandle};
use crate::playsync::CancelHandle;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// f32 callback: mix straight into the cpal buffer.
fn create_f32_callback(
    mixer: AudioMixer,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        mixer.process_into_output(data);
    }
}

/// Integer callback: mix into a scratch buffer and convert.
fn create_converting_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    mixer: AudioMixer,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;
    let mut scratch: Vec<f32> = Vec::new();

    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);

        if scratch.len() != data.len() {
            scratch.resize(data.len(), 0.0);
        }
        mixer.process_into_output(&mut scratch);

        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Builds and plays the output stream, then parks until cancelled. The stream isn't
/// Send on every platform, so it lives and dies on this thread.
fn run_output(
    device: cpal::Device,
    mixer: AudioMixer,
    cancel_handle: CancelHandle,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let config = cpal::StreamConfig {
        channels: mixer.num_channels(),
        sample_rate: mixer.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let sample_format = match device.default_output_config() {
        Ok(default_config) => default_config.sample_format(),
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    let stream_result = match sample_format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            create_converting_callback::<i16>(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        ),
        cpal::SampleFormat::I32 => device.build_output_stream(
            &config,
            create_converting_callback::<i32>(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        ),
        _ => device.build_output_stream(
            &config,
            create_f32_callback(mixer),
            |err| error!("CPAL output stream error: {}", err),
            None,
        ),
    };

    let stream = match stream_result {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to create output stream: {}", e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("failed to start output stream: {}", e)));
        return;
    }

    info!("CPAL output stream started successfully");
    let _ = ready.send(Ok(()));

    cancel_handle.wait();
    drop(stream);
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let output_configs = match device.supported_output_configs() {
                    Ok(output_configs) => output_configs,
                    Err(_) => continue,
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
        Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| format!("no device found with name {}", name).into())
    }
}

impl AudioDevice for Device {
    fn start(&self, mixer: AudioMixer) -> Result<OutputHandle, Box<dyn Error>> {
        let span = span!(Level::INFO, "start output (cpal)", device = self.name);
        let _enter = span.enter();

        if self.max_channels < mixer.num_channels() {
            return Err(format!(
                "{} channels requested, audio device {} only has {}",
                mixer.num_channels(),
                self.name,
                self.max_channels
            )
            .into());
        }

        info!(
            channels = mixer.num_channels(),
            sample_rate = mixer.sample_rate(),
            "Starting audio output"
        );

        let cancel_handle = CancelHandle::new();
        let (ready_tx, ready_rx) = mpsc::channel();
        let output_thread = {
            let device = self.device.clone();
            let cancel_handle = cancel_handle.clone();
            thread::Builder::new()
                .name("stepseq-output".to_string())
                .spawn(move || run_output(device, mixer, cancel_handle, ready_tx))?
        };

        let mut handle = OutputHandle::new(&self.name, cancel_handle, vec![output_thread]);
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                handle.stop();
                Err(e.into())
            }
            Err(_) => {
                handle.stop();
                Err("output thread exited before the stream started".into())
            }
        }
    }
}
