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
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc::{self, Sender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, span, Instrument, Level};

use crate::engine::EngineError;
use crate::transport::Transport;

pub mod keyboard;

/// Controller events that drive the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Starts the current pattern from step 0. Does nothing if already playing.
    Play,

    /// Stops playback.
    Stop,

    /// Stops if playing, plays otherwise.
    Toggle,

    /// Changes the tempo. Takes effect from the next scheduled step.
    Bpm(f64),

    /// Changes the swing, in percent.
    Swing(f64),

    /// Changes the master volume.
    Volume(f32),

    /// Reports the current step.
    Step,

    /// Stops playback and closes the controller.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives a transport from a driver's events.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(transport: Arc<Transport>, driver: Arc<dyn Driver>) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(
                async move { Controller::trigger_events(transport, driver).await }.instrument(span),
            ),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Applies events from the driver until it closes or a quit arrives.
    async fn trigger_events(transport: Arc<Transport>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        info!(bpm = transport.bpm(), "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = format!("{:?}", event), "Received event.");

            if event == Event::Quit {
                transport.stop();
                break;
            }
            if let Err(e) = Controller::apply(&transport, event).await {
                error!("Error talking to transport: {}", e);
            }
        }

        info!("Controller closing.");
        // Dropping the receiver unblocks a driver waiting to send.
        drop(events_rx);
        if let Err(e) = join_handle.await {
            error!("Error waiting for event monitor to stop: {}", e);
        }
    }

    async fn apply(transport: &Transport, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Play => {
                if !transport.is_playing() && !transport.play().await? {
                    info!("Nothing to play.");
                }
            }
            Event::Stop => transport.stop(),
            Event::Toggle => {
                transport.toggle().await?;
            }
            Event::Bpm(bpm) => transport.set_bpm(bpm)?,
            Event::Swing(percent) => transport.set_swing(percent),
            Event::Volume(volume) => transport.set_master_volume(volume),
            Event::Step => info!(
                step = transport.current_step(),
                playing = transport.is_playing(),
                "Current step."
            ),
            Event::Quit => transport.stop(),
        }
        Ok(())
    }
}
