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

//! The look-ahead step scheduler.
//!
//! A coarse timer wakes up every `lookahead` and schedules every step that falls
//! within `schedule_ahead` of the audio clock. Note times are computed on the audio
//! clock, so timer jitter never reaches the output as long as a pass runs before the
//! window is exhausted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, span, Instrument, Level};

use crate::clock::AudioClock;
use crate::pattern::PatternSnapshot;

/// How often a scheduling pass runs.
pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(25);

/// How far past the audio clock each pass schedules.
pub const DEFAULT_SCHEDULE_AHEAD: Duration = Duration::from_millis(100);

pub const DEFAULT_BPM: f64 = 120.0;

/// Slowest accepted tempo.
pub const MIN_BPM: f64 = 20.0;

/// Fastest accepted tempo. Keeps each pass to a handful of steps.
pub const MAX_BPM: f64 = 999.0;

/// Steps per beat. Steps are sixteenth notes.
const STEPS_PER_BEAT: f64 = 4.0;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid tempo {0}, must be between 20 and 999 beats per minute")]
    InvalidTempo(f64),
}

/// A concretely timed note.
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    pub track_id: String,
    pub sample_id: String,
    pub step: usize,
    /// Audio clock time in seconds.
    pub time: f64,
    /// Track volume times step velocity.
    pub gain: f32,
    pub pan: f32,
}

/// Receives triggers as they're scheduled. Called with the scheduler's lock held, so
/// implementations must hand the trigger off without blocking.
pub trait TriggerSink: Send + Sync {
    fn dispatch(&self, trigger: Trigger);
}

/// Converts a tempo to the duration of one step in seconds. Tempos outside
/// [`MIN_BPM`, `MAX_BPM`] are rejected.
pub fn step_duration(bpm: f64) -> Result<f64, SchedulerError> {
    if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
        return Err(SchedulerError::InvalidTempo(bpm));
    }
    Ok(60.0 / bpm / STEPS_PER_BEAT)
}

/// The mutable scheduling state.
#[derive(Debug)]
pub struct SequencerState {
    running: bool,
    current_step: usize,
    next_note_time: f64,
    step_duration: f64,
    /// Fraction of a step in [0, 1].
    swing: f64,
    bpm: f64,
    /// Bumped on every stop. Passes from an older generation do nothing.
    generation: u64,
}

impl SequencerState {
    pub fn new() -> SequencerState {
        SequencerState {
            running: false,
            current_step: 0,
            next_note_time: 0.0,
            step_duration: 60.0 / DEFAULT_BPM / STEPS_PER_BEAT,
            swing: 0.0,
            bpm: DEFAULT_BPM,
            generation: 0,
        }
    }

    /// Schedules every step whose time falls before `now + schedule_ahead`.
    pub fn schedule_pass(
        &mut self,
        now: f64,
        schedule_ahead: f64,
        snapshot: &PatternSnapshot,
    ) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        let horizon = now + schedule_ahead;

        while self.next_note_time < horizon {
            for track in snapshot.tracks() {
                if !snapshot.is_audible(track) {
                    continue;
                }
                let (Some(sample_id), Some(step)) =
                    (track.sample_id(), track.step(self.current_step))
                else {
                    continue;
                };
                if !step.active {
                    continue;
                }

                triggers.push(Trigger {
                    track_id: track.id().to_string(),
                    sample_id: sample_id.to_string(),
                    step: self.current_step,
                    time: self.next_note_time,
                    gain: track.volume() * step.velocity(),
                    pan: track.pan(),
                });
            }
            self.advance(snapshot.step_count());
        }

        triggers
    }

    /// Moves to the next step. The gap from an even step to the following odd step is
    /// stretched by the swing fraction; nothing is taken back from the next gap.
    fn advance(&mut self, step_count: usize) {
        let next_step = (self.current_step + 1) % step_count.max(1);
        let swung = self.current_step % 2 == 0 && next_step % 2 == 1;

        self.next_note_time += if swung {
            self.step_duration * (1.0 + self.swing)
        } else {
            self.step_duration
        };
        self.current_step = next_step;
    }

    fn reset(&mut self, now: f64) {
        self.current_step = 0;
        self.next_note_time = now;
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), SchedulerError> {
        self.step_duration = step_duration(bpm)?;
        self.bpm = bpm;
        Ok(())
    }

    /// Sets the swing in percent. Values outside [0, 100] are clamped.
    pub fn set_swing(&mut self, percent: f64) {
        let percent = if percent.is_finite() { percent } else { 0.0 };
        self.swing = percent.clamp(0.0, 100.0) / 100.0;
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn next_note_time(&self) -> f64 {
        self.next_note_time
    }

    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn swing(&self) -> f64 {
        self.swing
    }
}

impl Default for SequencerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives [`SequencerState`] from a periodic tokio timer.
pub struct Scheduler {
    state: Arc<Mutex<SequencerState>>,
    clock: Arc<dyn AudioClock>,
    sink: Arc<dyn TriggerSink>,
    lookahead: Duration,
    schedule_ahead: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        clock: Arc<dyn AudioClock>,
        sink: Arc<dyn TriggerSink>,
        lookahead: Duration,
        schedule_ahead: Duration,
    ) -> Scheduler {
        Scheduler {
            state: Arc::new(Mutex::new(SequencerState::new())),
            clock,
            sink,
            lookahead: lookahead.max(Duration::from_millis(1)),
            schedule_ahead,
            task: Mutex::new(None),
        }
    }

    /// Starts scheduling the snapshot from step 0 at the current audio time. A running
    /// scheduler is stopped first. Must be called from within a tokio runtime.
    pub fn start(&self, snapshot: PatternSnapshot) {
        self.stop();

        let generation = {
            let mut state = self.state.lock();
            state.reset(self.clock.now());
            state.running = true;
            info!(
                bpm = state.bpm,
                swing = state.swing,
                steps = snapshot.step_count(),
                tracks = snapshot.tracks().len(),
                "Sequencer started"
            );
            state.generation
        };

        let state = self.state.clone();
        let clock = self.clock.clone();
        let sink = self.sink.clone();
        let lookahead = self.lookahead;
        let schedule_ahead = self.schedule_ahead.as_secs_f64();

        let task = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(lookahead);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let current = run_pass(
                        &state,
                        clock.as_ref(),
                        sink.as_ref(),
                        generation,
                        schedule_ahead,
                        &snapshot,
                    );
                    if !current {
                        return;
                    }
                }
            }
            .instrument(span!(Level::DEBUG, "scheduler", generation)),
        );

        *self.task.lock() = Some(task);
    }

    /// Stops scheduling and resets to step 0. Idempotent. Notes already handed to the
    /// sink still play.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            if state.running {
                info!("Sequencer stopped");
            }
            state.running = false;
            state.current_step = 0;
        }

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Changes the tempo for the following steps. Steps already scheduled keep their time.
    pub fn set_bpm(&self, bpm: f64) -> Result<(), SchedulerError> {
        self.state.lock().set_bpm(bpm)
    }

    pub fn set_swing(&self, percent: f64) {
        self.state.lock().set_swing(percent)
    }

    /// The next step to be scheduled.
    pub fn current_step(&self) -> usize {
        self.state.lock().current_step
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn bpm(&self) -> f64 {
        self.state.lock().bpm
    }

    pub fn swing(&self) -> f64 {
        self.state.lock().swing
    }

    pub fn step_duration(&self) -> f64 {
        self.state.lock().step_duration
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Runs one scheduling pass. Returns false if the generation is stale, in which case
/// nothing is emitted.
fn run_pass(
    state: &Mutex<SequencerState>,
    clock: &dyn AudioClock,
    sink: &dyn TriggerSink,
    generation: u64,
    schedule_ahead: f64,
    snapshot: &PatternSnapshot,
) -> bool {
    let mut state = state.lock();
    if state.generation != generation || !state.running {
        return false;
    }

    for trigger in state.schedule_pass(clock.now(), schedule_ahead, snapshot) {
        debug!(
            track = trigger.track_id,
            sample = trigger.sample_id,
            step = trigger.step,
            time = trigger.time,
            "Scheduling note"
        );
        sink.dispatch(trigger);
    }
    true
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::clock::ManualClock;
    use crate::pattern::Track;
    use crate::testutil::eventually_async;

    #[derive(Default)]
    struct RecordingSink {
        triggers: parking_lot::Mutex<Vec<Trigger>>,
    }

    impl RecordingSink {
        fn triggers(&self) -> Vec<Trigger> {
            self.triggers.lock().clone()
        }
    }

    impl TriggerSink for RecordingSink {
        fn dispatch(&self, trigger: Trigger) {
            self.triggers.lock().push(trigger);
        }
    }

    fn snapshot(step_count: usize, tracks: Vec<Track>) -> PatternSnapshot {
        PatternSnapshot::new(NonZeroUsize::new(step_count).unwrap(), tracks)
    }

    fn every_step(id: &str, sample: &str, step_count: usize) -> Track {
        let hits: Vec<usize> = (0..step_count).collect();
        Track::new(id, step_count)
            .with_sample(Some(sample))
            .with_hits(&hits, 1.0)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_step_duration() {
        assert!(approx(0.125, step_duration(120.0).unwrap()));
        for bpm in 60..=200 {
            let bpm = bpm as f64;
            assert_eq!(60.0 / bpm / 4.0, step_duration(bpm).unwrap());
        }
        assert!(step_duration(0.0).is_err());
        assert!(step_duration(-10.0).is_err());
        assert!(step_duration(f64::NAN).is_err());
        assert!(step_duration(f64::INFINITY).is_err());
    }

    #[test]
    fn test_tempo_range() {
        assert!(step_duration(MIN_BPM).is_ok());
        assert!(step_duration(MAX_BPM).is_ok());
        assert!(step_duration(MIN_BPM - 1.0).is_err());
        assert!(step_duration(MAX_BPM + 1.0).is_err());

        let mut state = SequencerState::new();
        assert!(state.set_bpm(1e20).is_err());
        assert!(state.set_bpm(1e7).is_err());
        // A rejected tempo leaves the old one in place.
        assert_eq!(DEFAULT_BPM, state.bpm());

        // The fastest tempo still schedules a bounded number of steps per pass.
        state.set_bpm(MAX_BPM).unwrap();
        let snapshot = snapshot(16, vec![every_step("kick", "kick", 16)]);
        let triggers = state.schedule_pass(10.0, 0.1, &snapshot);
        assert!(triggers.len() < 1000);
        assert!(state.next_note_time() >= 10.1);
    }

    #[test]
    fn test_pass_stays_within_window() {
        let mut state = SequencerState::new();
        let snapshot = snapshot(16, vec![every_step("kick", "kick", 16)]);

        let triggers = state.schedule_pass(0.0, 0.1, &snapshot);
        assert_eq!(1, triggers.len());
        assert_eq!(0, triggers[0].step);
        assert_eq!(1, state.current_step());

        // Nothing new until the clock moves.
        assert!(state.schedule_pass(0.0, 0.1, &snapshot).is_empty());

        let triggers = state.schedule_pass(0.3, 0.1, &snapshot);
        let steps: Vec<usize> = triggers.iter().map(|t| t.step).collect();
        assert_eq!(vec![1, 2, 3], steps);
        assert!(triggers.iter().all(|t| t.time < 0.4));
    }

    #[test]
    fn test_same_step_shares_timestamp() {
        let mut state = SequencerState::new();
        let snapshot = snapshot(
            4,
            vec![every_step("kick", "kick", 4), every_step("hat", "hat", 4)],
        );

        let triggers = state.schedule_pass(0.0, 0.5, &snapshot);
        assert_eq!(8, triggers.len());
        for pair in triggers.chunks(2) {
            assert_eq!(pair[0].step, pair[1].step);
            assert_eq!(pair[0].time, pair[1].time);
            assert_ne!(pair[0].track_id, pair[1].track_id);
        }
        assert!(triggers.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_swing_extends_even_to_odd_gap() {
        for swing in [0.0, 25.0, 50.0, 100.0] {
            let mut state = SequencerState::new();
            state.set_swing(swing);
            let snapshot = snapshot(8, vec![every_step("hat", "hat", 8)]);

            let times: Vec<f64> = state
                .schedule_pass(0.0, 2.0, &snapshot)
                .iter()
                .map(|t| t.time)
                .collect();

            for (step, gap) in times.windows(2).map(|w| w[1] - w[0]).enumerate() {
                let expected = if step % 2 == 0 {
                    0.125 * (1.0 + swing / 100.0)
                } else {
                    0.125
                };
                assert!(
                    approx(expected, gap),
                    "swing {} step {}: expected {} got {}",
                    swing,
                    step,
                    expected,
                    gap
                );
            }
        }
    }

    #[test]
    fn test_swing_is_clamped() {
        let mut state = SequencerState::new();
        state.set_swing(250.0);
        assert_eq!(1.0, state.swing());
        state.set_swing(-5.0);
        assert_eq!(0.0, state.swing());
        state.set_swing(f64::NAN);
        assert_eq!(0.0, state.swing());
    }

    #[test]
    fn test_silent_tracks_are_skipped() {
        let mut state = SequencerState::new();
        let mut muted = every_step("muted", "snare", 4);
        muted.mute = true;
        let unassigned = Track::new("empty", 4).with_hits(&[0, 1, 2, 3], 1.0);
        let sparse = Track::new("sparse", 4)
            .with_sample(Some("kick"))
            .with_hits(&[2], 0.5)
            .with_volume(0.5)
            .with_pan(-0.25);
        let snapshot = snapshot(4, vec![muted, unassigned, sparse]);

        let triggers = state.schedule_pass(0.0, 0.5, &snapshot);

        assert_eq!(
            vec![Trigger {
                track_id: "sparse".to_string(),
                sample_id: "kick".to_string(),
                step: 2,
                time: 0.25,
                gain: 0.25,
                pan: -0.25,
            }],
            triggers
        );
    }

    #[test]
    fn test_solo_does_not_silence_other_tracks() {
        let mut state = SequencerState::new();
        let mut soloed = every_step("hat", "hat", 2);
        soloed.solo = true;
        let snapshot = snapshot(2, vec![every_step("kick", "kick", 2), soloed]);

        let triggers = state.schedule_pass(0.0, 0.2, &snapshot);
        let kicks: Vec<usize> = triggers
            .iter()
            .filter(|t| t.track_id == "kick")
            .map(|t| t.step)
            .collect();
        assert_eq!(vec![0, 1], kicks);
        assert_eq!(2, triggers.iter().filter(|t| t.track_id == "hat").count());
    }

    #[test]
    fn test_wraps_around_pattern() {
        let mut state = SequencerState::new();
        let kick = Track::new("kick", 32)
            .with_sample(Some("kick"))
            .with_hits(&[0, 4, 8, 12, 16, 20, 24, 28], 1.0);
        let snapshot = snapshot(32, vec![kick]);
        state.set_bpm(146.0).unwrap();
        let duration = state.step_duration();

        // One full loop, stopping just short of the next downbeat.
        let triggers = state.schedule_pass(0.0, 32.0 * duration - 1e-6, &snapshot);
        assert_eq!(8, triggers.len());
        for pair in triggers.windows(2) {
            assert!(approx(4.0 * duration, pair[1].time - pair[0].time));
        }
        assert_eq!(0, state.current_step());

        let next_loop = state.schedule_pass(0.0, 32.0 * duration + 1e-6, &snapshot);
        assert_eq!(1, next_loop.len());
        assert_eq!(0, next_loop[0].step);
    }

    #[test]
    fn test_tempo_change_is_not_retroactive() {
        let mut state = SequencerState::new();
        let snapshot = snapshot(4, vec![every_step("kick", "kick", 4)]);

        state.schedule_pass(0.0, 0.1, &snapshot);
        let pending = state.next_note_time();

        assert!(state.set_bpm(0.0).is_err());
        assert!(state.set_bpm(60.0).is_ok());
        assert_eq!(pending, state.next_note_time());

        let times: Vec<f64> = state
            .schedule_pass(0.3, 0.1, &snapshot)
            .iter()
            .map(|t| t.time)
            .collect();
        assert_eq!(vec![pending, pending + 0.25], times);
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_stops() {
        let clock = Arc::new(ManualClock::new(10.0));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(
            clock.clone(),
            sink.clone(),
            Duration::from_millis(5),
            DEFAULT_SCHEDULE_AHEAD,
        );

        scheduler.start(snapshot(16, vec![every_step("kick", "kick", 16)]));
        assert!(scheduler.is_running());

        eventually_async(
            || {
                let sink = sink.clone();
                async move { !sink.triggers().is_empty() }
            },
            "Scheduler never emitted the first step",
        )
        .await;
        let first = sink.triggers();
        assert_eq!(1, first.len());
        assert!(approx(10.0, first[0].time));

        clock.advance(0.5);
        eventually_async(
            || {
                let sink = sink.clone();
                async move { sink.triggers().len() >= 5 }
            },
            "Scheduler never caught up with the clock",
        )
        .await;

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(0, scheduler.current_step());
        let emitted = sink.triggers().len();

        clock.advance(10.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(emitted, sink.triggers().len());

        // Stopping again changes nothing.
        let stopped = (scheduler.is_running(), scheduler.current_step());
        scheduler.stop();
        assert_eq!(stopped, (scheduler.is_running(), scheduler.current_step()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(emitted, sink.triggers().len());
    }

    #[tokio::test]
    async fn test_restart_begins_at_step_zero() {
        let clock = Arc::new(ManualClock::new(0.0));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(
            clock.clone(),
            sink.clone(),
            Duration::from_millis(5),
            DEFAULT_SCHEDULE_AHEAD,
        );
        let pattern = snapshot(16, vec![every_step("kick", "kick", 16)]);

        scheduler.start(pattern.clone());
        clock.advance(0.6);
        eventually_async(
            || {
                let sink = sink.clone();
                async move { sink.triggers().len() >= 4 }
            },
            "Scheduler never advanced",
        )
        .await;

        scheduler.start(pattern);
        eventually_async(
            || {
                let sink = sink.clone();
                async move {
                    sink.triggers()
                        .last()
                        .is_some_and(|t| t.step == 0 && t.time >= 0.6)
                }
            },
            "Restart didn't schedule step 0 at the current time",
        )
        .await;
        scheduler.stop();
    }

    #[test]
    fn test_stale_pass_emits_nothing() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::default();
        let state = Mutex::new(SequencerState::new());
        let pattern = snapshot(4, vec![every_step("kick", "kick", 4)]);

        {
            let mut state = state.lock();
            state.running = true;
        }
        assert!(run_pass(&state, &clock, &sink, 0, 0.1, &pattern));
        assert_eq!(1, sink.triggers().len());

        // A stop lands between the timer firing and the pass taking the lock.
        state.lock().generation += 1;
        clock.advance(1.0);
        assert!(!run_pass(&state, &clock, &sink, 0, 0.1, &pattern));
        assert_eq!(1, sink.triggers().len());
    }
}
