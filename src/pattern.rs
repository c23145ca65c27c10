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

//! The sequencer data model: samples, steps, tracks and patterns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Number of steps in a freshly created pattern.
pub const DEFAULT_STEP_COUNT: usize = 32;

/// Default track volume.
pub const DEFAULT_TRACK_VOLUME: f32 = 0.8;

/// Default step velocity.
pub const DEFAULT_VELOCITY: f32 = 1.0;

/// An immutable description of a playable sample. Decoded audio is owned by the
/// sample cache and is not part of a sample's identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    id: String,
    name: String,
    source: String,
    category: String,
}

impl Sample {
    /// Creates a new sample descriptor.
    pub fn new(id: &str, name: &str, source: &str, category: &str) -> Sample {
        Sample {
            id: id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            category: category.to_string(),
        }
    }

    /// The unique ID of the sample.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name of the sample.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opaque, fetchable source reference (a file path).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The category of the sample (kick, snare, ...).
    pub fn category(&self) -> &str {
        &self.category
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.category)
    }
}

/// Resolves sample IDs to sample descriptors.
pub trait SampleLibrary: Send + Sync {
    fn sample(&self, id: &str) -> Option<Sample>;
}

impl SampleLibrary for HashMap<String, Sample> {
    fn sample(&self, id: &str) -> Option<Sample> {
        self.get(id).cloned()
    }
}

/// One position in a track's timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub active: bool,
    velocity: f32,
}

impl Step {
    /// Creates a step. Velocity is clamped to [0, 1].
    pub fn new(active: bool, velocity: f32) -> Step {
        Step {
            active,
            velocity: velocity.clamp(0.0, 1.0),
        }
    }

    /// An inactive step at full velocity.
    pub fn off() -> Step {
        Step::new(false, DEFAULT_VELOCITY)
    }

    /// An active step with the given velocity.
    pub fn on(velocity: f32) -> Step {
        Step::new(true, velocity)
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }
}

impl Default for Step {
    fn default() -> Self {
        Step::off()
    }
}

/// One instrument lane: a sample and its step sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    id: String,
    sample_id: Option<String>,
    category: String,
    steps: Vec<Step>,
    volume: f32,
    pan: f32,
    pub mute: bool,
    pub solo: bool,
}

impl Track {
    /// Creates an empty track with the given number of inactive steps.
    pub fn new(id: &str, step_count: usize) -> Track {
        Track {
            id: id.to_string(),
            sample_id: None,
            category: "track".to_string(),
            steps: vec![Step::off(); step_count],
            volume: DEFAULT_TRACK_VOLUME,
            pan: 0.0,
            mute: false,
            solo: false,
        }
    }

    /// Assigns (or clears) the track's sample.
    pub fn with_sample(mut self, sample_id: Option<&str>) -> Track {
        self.sample_id = sample_id.map(|s| s.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Track {
        self.category = category.to_string();
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Track {
        self.set_volume(volume);
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Track {
        self.set_pan(pan);
        self
    }

    /// Activates the given steps at the given velocity. Out of range indices are ignored.
    pub fn with_hits(mut self, hits: &[usize], velocity: f32) -> Track {
        for &hit in hits {
            if let Some(step) = self.steps.get_mut(hit) {
                *step = Step::on(velocity);
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sample_id(&self) -> Option<&str> {
        self.sample_id.as_deref()
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Gets the step at the given position. Positions past the end of the track are
    /// reported as None and treated as inactive by the scheduler.
    pub fn step(&self, position: usize) -> Option<&Step> {
        self.steps.get(position)
    }

    /// Replaces the step at the given position. Returns false if the position is out of range.
    pub fn set_step(&mut self, position: usize, step: Step) -> bool {
        match self.steps.get_mut(position) {
            Some(existing) => {
                *existing = step;
                true
            }
            None => false,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Sets the pan, clamped to [-1, 1].
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }
}

/// A full set of tracks sharing one step timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    id: String,
    name: String,
    step_count: usize,
    tracks: BTreeMap<String, Track>,
}

impl Pattern {
    /// Creates an empty pattern.
    pub fn new(id: &str, name: &str, step_count: usize) -> Pattern {
        Pattern {
            id: id.to_string(),
            name: name.to_string(),
            step_count,
            tracks: BTreeMap::new(),
        }
    }

    /// Adds a track, replacing any existing track with the same ID.
    pub fn add_track(&mut self, track: Track) {
        self.tracks.insert(track.id().to_string(), track);
    }

    pub fn with_track(mut self, track: Track) -> Pattern {
        self.add_track(track);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn tracks(&self) -> &BTreeMap<String, Track> {
        &self.tracks
    }

    /// The distinct sample IDs referenced by this pattern's tracks.
    pub fn sample_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tracks
            .values()
            .filter_map(|track| track.sample_id().map(|s| s.to_string()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Takes a read-only snapshot of the pattern for the scheduler. Returns None if the
    /// pattern has no steps.
    pub fn snapshot(&self) -> Option<PatternSnapshot> {
        let step_count = NonZeroUsize::new(self.step_count)?;
        Some(PatternSnapshot::new(
            step_count,
            self.tracks.values().cloned().collect(),
        ))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Steps={}, Tracks={})",
            self.name,
            self.step_count,
            self.tracks.len()
        )
    }
}

/// A read-only view of a pattern's tracks handed to the scheduler when it starts.
/// The scheduler never observes later edits to the pattern.
#[derive(Clone, Debug)]
pub struct PatternSnapshot {
    step_count: NonZeroUsize,
    tracks: Arc<[Track]>,
}

impl PatternSnapshot {
    pub fn new(step_count: NonZeroUsize, tracks: Vec<Track>) -> PatternSnapshot {
        PatternSnapshot {
            step_count,
            tracks: tracks.into(),
        }
    }

    pub fn step_count(&self) -> usize {
        self.step_count.get()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Returns true if the track can sound at all: it has a sample and isn't muted.
    /// Solo is carried as track data only and never silences other tracks.
    pub fn is_audible(&self, track: &Track) -> bool {
        track.sample_id.is_some() && !track.mute
    }
}
