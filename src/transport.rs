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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, span, Level};

use crate::engine::{Engine, EngineError};
use crate::pattern::Pattern;

/// How often UI callers should poll the current step. Independent of the scheduler's
/// own timer.
pub const UI_POLL_INTERVAL: Duration = Duration::from_millis(16);

struct TransportState {
    pattern: Option<Pattern>,
    playing: bool,
    /// Bumped by every stop so a play that's still warming samples can tell it was
    /// overtaken.
    epoch: u64,
}

/// Play/stop/tempo controls over the engine.
pub struct Transport {
    engine: Arc<Engine>,
    state: Mutex<TransportState>,
}

impl Transport {
    pub fn new(engine: Arc<Engine>) -> Transport {
        Transport {
            engine,
            state: Mutex::new(TransportState {
                pattern: None,
                playing: false,
                epoch: 0,
            }),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Sets the current pattern. If playing, the sequencer restarts on the new pattern.
    pub fn set_pattern(&self, pattern: Pattern) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        info!(pattern = %pattern, "Pattern selected");

        if state.playing {
            match pattern.snapshot() {
                Some(snapshot) => self.engine.start_sequencer(snapshot)?,
                None => {
                    self.engine.stop_sequencer();
                    state.playing = false;
                    state.epoch += 1;
                }
            }
        }
        state.pattern = Some(pattern);
        Ok(())
    }

    pub fn pattern(&self) -> Option<Pattern> {
        self.state.lock().pattern.clone()
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), EngineError> {
        self.engine.set_bpm(bpm)
    }

    pub fn bpm(&self) -> f64 {
        self.engine.bpm()
    }

    /// Sets the swing in percent.
    pub fn set_swing(&self, percent: f64) {
        self.engine.set_swing(percent)
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.engine.set_master_volume(volume)
    }

    /// Starts playback from step 0. Does nothing and returns false if there's no pattern
    /// to play. The pattern's samples are loaded before the first step is scheduled;
    /// samples that fail to load are skipped.
    pub async fn play(&self) -> Result<bool, EngineError> {
        let (pattern, epoch) = {
            let state = self.state.lock();
            match &state.pattern {
                Some(pattern) => (pattern.clone(), state.epoch),
                None => return Ok(false),
            }
        };
        let Some(snapshot) = pattern.snapshot() else {
            return Ok(false);
        };

        let span = span!(Level::INFO, "play", pattern = pattern.id());
        let _enter = span.enter();

        self.engine.initialize()?;
        self.engine.warm(&pattern.sample_ids()).await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            info!("Stopped while loading samples");
            return Ok(false);
        }
        self.engine.start_sequencer(snapshot)?;
        state.playing = true;
        Ok(true)
    }

    /// Stops playback. Always succeeds.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.engine.stop_sequencer();
        state.playing = false;
        state.epoch += 1;
    }

    /// Stops if playing, plays otherwise. Returns whether the transport is now playing.
    pub async fn toggle(&self) -> Result<bool, EngineError> {
        if self.is_playing() {
            self.stop();
            Ok(false)
        } else {
            self.play().await
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// The step the sequencer will schedule next.
    pub fn current_step(&self) -> usize {
        self.engine.current_step()
    }

    /// Polls the current step at [`UI_POLL_INTERVAL`] and publishes changes. The task
    /// ends when every receiver is dropped.
    pub fn watch_steps(self: &Arc<Self>) -> watch::Receiver<usize> {
        let (tx, rx) = watch::channel(self.current_step());
        let transport = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(UI_POLL_INTERVAL);
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    return;
                }
                let step = transport.current_step();
                tx.send_if_modified(|current| {
                    if *current != step {
                        *current = step;
                        true
                    } else {
                        false
                    }
                });
            }
        });
        rx
    }
}
