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

//! The playback engine: sample cache, scheduler and audio output behind one facade.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, span, warn, Level};

use crate::audio::{self, AudioMixer, NoteParams, OutputHandle, PlaybackGraph, SourceSender};
use crate::clock::AudioClock;
use crate::config::{self, EngineConfig};
use crate::pattern::{PatternSnapshot, Sample, SampleLibrary};
use crate::samples::{
    self, DecodedSample, SampleCache, SampleDecoder, SampleFetcher, SampleLoadError, SampleStatus,
};
use crate::scheduler::{Scheduler, SchedulerError, Trigger, TriggerSink};

/// Capacity of the engine event channel. Slow subscribers miss the oldest events.
const EVENT_CAPACITY: usize = 64;

/// Default preview volume when none is given.
const DEFAULT_PREVIEW_VOLUME: f32 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Audio initialization failed: {0}")]
    Initialization(String),

    #[error("Unknown sample {0}")]
    UnknownSample(String),

    #[error(transparent)]
    SampleLoad(#[from] SampleLoadError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Things that went wrong off the audio path. Dropped notes never stop the sequencer;
/// they're reported here instead.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A sample couldn't be fetched or decoded.
    SampleLoadFailed(SampleLoadError),
    /// A note referenced a sample the library doesn't know.
    SampleUnavailable(String),
}

/// Options for previewing a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayOptions {
    /// Linear gain (default: 1.0).
    pub volume: Option<f32>,
    /// Stereo position. No pan stage is built when unset.
    pub pan: Option<f32>,
}

/// Resolves sample ids to buffers and hands finished voices to the mixer. Shared by
/// the scheduler and preview paths.
struct NoteResolver {
    library: Arc<dyn SampleLibrary>,
    cache: Arc<SampleCache>,
    mixer: AudioMixer,
    source_tx: SourceSender,
    events: broadcast::Sender<EngineEvent>,
}

impl NoteResolver {
    /// Looks up the sample, loads it through the cache and schedules a fresh voice at
    /// `time` on the audio clock, or right away when there's no time.
    async fn resolve_and_trigger(
        &self,
        sample_id: &str,
        time: Option<f64>,
        params: NoteParams,
    ) -> Result<(), EngineError> {
        let Some(sample) = self.library.sample(sample_id) else {
            warn!(sample = sample_id, "Dropping note for unknown sample");
            let _ = self
                .events
                .send(EngineEvent::SampleUnavailable(sample_id.to_string()));
            return Err(EngineError::UnknownSample(sample_id.to_string()));
        };

        let buffer = match self.cache.load(&sample).await {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(sample = sample_id, error = %e, "Dropping note, sample failed to load");
                let _ = self.events.send(EngineEvent::SampleLoadFailed(e.clone()));
                return Err(e.into());
            }
        };

        let start_frame = match time {
            Some(time) => self.mixer.frame_at(time),
            None => self.mixer.current_frame(),
        };
        if start_frame < self.mixer.current_frame() {
            debug!(sample = sample_id, "Note is late, playing immediately");
        }

        let voice = PlaybackGraph::build(buffer, params, start_frame);
        if self.source_tx.send(voice).is_err() {
            warn!(sample = sample_id, "Mixer is gone, dropping note");
        }
        Ok(())
    }
}

/// Hands scheduler triggers to the runtime without blocking the scheduling pass.
struct TriggerDispatcher {
    resolver: Arc<NoteResolver>,
    runtime: tokio::runtime::Handle,
}

impl TriggerSink for TriggerDispatcher {
    fn dispatch(&self, trigger: Trigger) {
        let resolver = self.resolver.clone();
        self.runtime.spawn(async move {
            // Failures are already logged and published.
            let _ = resolver
                .resolve_and_trigger(
                    &trigger.sample_id,
                    Some(trigger.time),
                    NoteParams::new(trigger.gain, Some(trigger.pan)),
                )
                .await;
        });
    }
}

/// The playback engine.
pub struct Engine {
    audio: config::Audio,
    resolver: Arc<NoteResolver>,
    scheduler: Scheduler,
    output: Mutex<Option<OutputHandle>>,
}

impl Engine {
    /// Creates an engine that loads samples from the given library with the given
    /// fetcher and decoder. Must be called from within a tokio runtime.
    pub fn new(
        config: &EngineConfig,
        library: Arc<dyn SampleLibrary>,
        fetcher: Arc<dyn SampleFetcher>,
        decoder: Arc<dyn SampleDecoder>,
    ) -> Result<Engine, EngineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Initialization(e.to_string()))?;
        let audio = config.audio().clone();
        let mixer = AudioMixer::new(audio.channels(), audio.sample_rate());
        mixer.set_master_gain(config.master_volume());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let resolver = Arc::new(NoteResolver {
            library,
            cache: Arc::new(SampleCache::new(fetcher, decoder, config.max_cache_size())),
            source_tx: mixer.source_sender(),
            mixer: mixer.clone(),
            events,
        });

        let lookahead = config
            .lookahead()
            .map_err(|e| EngineError::Initialization(e.to_string()))?;
        let schedule_ahead = config
            .schedule_ahead()
            .map_err(|e| EngineError::Initialization(e.to_string()))?;
        let scheduler = Scheduler::new(
            Arc::new(mixer),
            Arc::new(TriggerDispatcher {
                resolver: resolver.clone(),
                runtime,
            }),
            lookahead,
            schedule_ahead,
        );
        scheduler.set_bpm(config.bpm())?;
        scheduler.set_swing(config.swing());

        Ok(Engine {
            audio,
            resolver,
            scheduler,
            output: Mutex::new(None),
        })
    }

    /// Creates an engine that reads sample files relative to `base_path` and decodes
    /// them to the configured sample rate.
    pub fn with_files(
        config: &EngineConfig,
        library: Arc<dyn SampleLibrary>,
        base_path: &std::path::Path,
    ) -> Result<Engine, EngineError> {
        let sample_rate = config.audio().sample_rate();
        Engine::new(
            config,
            library,
            Arc::new(samples::FileFetcher::new(base_path)),
            Arc::new(samples::SymphoniaDecoder::new(sample_rate)),
        )
    }

    /// Opens the audio device and starts rendering. Idempotent; a failed attempt can be
    /// retried.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let mut output = self.output.lock();
        if output.is_some() {
            return Ok(());
        }

        let span = span!(Level::INFO, "initialize", device = self.audio.device());
        let _enter = span.enter();

        let device = audio::get_device(&self.audio)
            .map_err(|e| EngineError::Initialization(e.to_string()))?;
        let handle = device
            .start(self.resolver.mixer.clone())
            .map_err(|e| EngineError::Initialization(e.to_string()))?;

        info!(device = %device, "Engine initialized");
        *output = Some(handle);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Loads a sample into the cache.
    pub async fn load_sample(&self, sample: &Sample) -> Result<DecodedSample, SampleLoadError> {
        self.resolver.cache.load(sample).await
    }

    /// Loads every known sample in the list. Failures are logged and published and
    /// don't stop the others. Returns the number loaded.
    pub async fn warm(&self, sample_ids: &[String]) -> usize {
        let mut loads = tokio::task::JoinSet::new();
        for sample_id in sample_ids {
            let Some(sample) = self.resolver.library.sample(sample_id) else {
                let _ = self
                    .resolver
                    .events
                    .send(EngineEvent::SampleUnavailable(sample_id.to_string()));
                continue;
            };
            let cache = self.resolver.cache.clone();
            loads.spawn(async move { cache.load(&sample).await });
        }

        let mut loaded = 0;
        while let Some(result) = loads.join_next().await {
            match result {
                Ok(Ok(_)) => loaded += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to warm sample");
                    let _ = self.resolver.events.send(EngineEvent::SampleLoadFailed(e));
                }
                Err(e) => warn!(error = %e, "Warm task failed"),
            }
        }
        debug!(loaded, requested = sample_ids.len(), "Warmed samples");
        loaded
    }

    /// Returns the cache status of the sample, if the cache has seen it.
    pub fn sample_status(&self, sample_id: &str) -> Option<SampleStatus> {
        self.resolver.cache.status(sample_id)
    }

    /// Plays a sample right away, outside the sequencer.
    pub async fn play_sample(
        &self,
        sample_id: &str,
        options: PlayOptions,
    ) -> Result<(), EngineError> {
        self.initialize()?;
        let params = NoteParams::new(
            options.volume.unwrap_or(DEFAULT_PREVIEW_VOLUME),
            options.pan,
        );
        self.resolver
            .resolve_and_trigger(sample_id, None, params)
            .await
    }

    /// Schedules a sample at an audio clock time. This is the path sequenced notes take.
    pub async fn resolve_and_trigger(
        &self,
        sample_id: &str,
        time: Option<f64>,
        gain: f32,
        pan: Option<f32>,
    ) -> Result<(), EngineError> {
        self.resolver
            .resolve_and_trigger(sample_id, time, NoteParams::new(gain, pan))
            .await
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), EngineError> {
        Ok(self.scheduler.set_bpm(bpm)?)
    }

    /// Sets the swing in percent, clamped to [0, 100].
    pub fn set_swing(&self, percent: f64) {
        self.scheduler.set_swing(percent)
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.resolver.mixer.set_master_gain(volume)
    }

    pub fn master_volume(&self) -> f32 {
        self.resolver.mixer.master_gain()
    }

    /// Starts the sequencer on the snapshot, initializing audio first if needed.
    pub fn start_sequencer(&self, snapshot: PatternSnapshot) -> Result<(), EngineError> {
        self.initialize()?;
        self.scheduler.start(snapshot);
        Ok(())
    }

    pub fn stop_sequencer(&self) {
        self.scheduler.stop()
    }

    pub fn is_sequencer_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// The next step the sequencer will schedule.
    pub fn current_step(&self) -> usize {
        self.scheduler.current_step()
    }

    pub fn bpm(&self) -> f64 {
        self.scheduler.bpm()
    }

    /// The current audio clock time in seconds.
    pub fn now(&self) -> f64 {
        self.resolver.mixer.now()
    }

    /// The peak output level of the most recent block.
    pub fn analysis(&self) -> f32 {
        self.resolver.mixer.peak_level()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.resolver.events.subscribe()
    }

    /// Summarizes the first channel of a buffer for display.
    pub fn generate_waveform_data(buffer: &DecodedSample, points: usize) -> Vec<f32> {
        samples::generate_waveform_data(buffer, points)
    }

    /// Stops the sequencer and closes the audio output.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        if let Some(mut output) = self.output.lock().take() {
            output.stop();
        }
    }
}
