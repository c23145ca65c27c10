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
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::error::ConfigError;
use crate::pattern::{
    Pattern, Sample, Step, Track, DEFAULT_STEP_COUNT, DEFAULT_TRACK_VOLUME, DEFAULT_VELOCITY,
};

/// A kit file: a sample library and a pattern that plays it.
#[derive(Deserialize, Clone, Debug)]
pub struct Kit {
    samples: Vec<SampleConfig>,
    pattern: PatternConfig,

    /// The directory relative sample files resolve against.
    #[serde(skip)]
    base_path: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SampleConfig {
    id: String,
    name: Option<String>,
    /// The sample file. Relative paths resolve against the kit file's directory.
    file: String,
    category: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PatternConfig {
    id: String,
    name: Option<String>,
    step_count: Option<usize>,
    #[serde(default)]
    tracks: Vec<TrackConfig>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TrackConfig {
    id: String,
    sample: Option<String>,
    category: Option<String>,
    volume: Option<f32>,
    pan: Option<f32>,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    solo: bool,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// An active step, either a bare step number or a step with a velocity.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(untagged)]
pub enum Hit {
    Step(usize),
    Velocity { step: usize, velocity: f32 },
}

impl Hit {
    fn step(&self) -> usize {
        match self {
            Hit::Step(step) => *step,
            Hit::Velocity { step, .. } => *step,
        }
    }

    fn velocity(&self) -> f32 {
        match self {
            Hit::Step(_) => DEFAULT_VELOCITY,
            Hit::Velocity { velocity, .. } => *velocity,
        }
    }
}

impl Kit {
    /// Parses and validates a kit from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Kit, ConfigError> {
        let mut kit = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Kit>()?;
        kit.base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        kit.validate()?;
        Ok(kit)
    }

    /// Checks ids, sample references and step ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut sample_ids = HashSet::new();
        for sample in &self.samples {
            if !sample_ids.insert(sample.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sample id {}",
                    sample.id
                )));
            }
        }

        let step_count = self.pattern.step_count();
        if step_count == 0 {
            return Err(ConfigError::Invalid(format!(
                "pattern {} must have at least one step",
                self.pattern.id
            )));
        }

        let mut track_ids = HashSet::new();
        for track in &self.pattern.tracks {
            if !track_ids.insert(track.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate track id {}",
                    track.id
                )));
            }
            if let Some(sample) = &track.sample {
                if !sample_ids.contains(sample.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "track {} references unknown sample {}",
                        track.id, sample
                    )));
                }
            }
            if let Some(hit) = track.hits.iter().find(|hit| hit.step() >= step_count) {
                return Err(ConfigError::Invalid(format!(
                    "track {} has a hit on step {} but the pattern only has {} steps",
                    track.id,
                    hit.step(),
                    step_count
                )));
            }
        }
        Ok(())
    }

    /// The directory relative sample files resolve against.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Builds the sample library, keyed by sample id.
    pub fn library(&self) -> HashMap<String, Sample> {
        self.samples
            .iter()
            .map(|sample| (sample.id.clone(), sample.to_sample()))
            .collect()
    }

    /// Builds the pattern.
    pub fn pattern(&self) -> Pattern {
        self.pattern.to_pattern()
    }
}

impl SampleConfig {
    fn to_sample(&self) -> Sample {
        Sample::new(
            &self.id,
            self.name.as_deref().unwrap_or(&self.id),
            &self.file,
            self.category.as_deref().unwrap_or_default(),
        )
    }
}

impl PatternConfig {
    fn step_count(&self) -> usize {
        self.step_count.unwrap_or(DEFAULT_STEP_COUNT)
    }

    fn to_pattern(&self) -> Pattern {
        let step_count = self.step_count();
        let mut pattern = Pattern::new(
            &self.id,
            self.name.as_deref().unwrap_or(&self.id),
            step_count,
        );
        for track in &self.tracks {
            pattern.add_track(track.to_track(step_count));
        }
        pattern
    }
}

impl TrackConfig {
    fn to_track(&self, step_count: usize) -> Track {
        let mut track = Track::new(&self.id, step_count)
            .with_sample(self.sample.as_deref())
            .with_category(self.category.as_deref().unwrap_or_default())
            .with_volume(self.volume.unwrap_or(DEFAULT_TRACK_VOLUME))
            .with_pan(self.pan.unwrap_or(0.0));
        track.mute = self.mute;
        track.solo = self.solo;
        for hit in &self.hits {
            track.set_step(hit.step(), Step::on(hit.velocity()));
        }
        track
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use config::FileFormat;

    use super::*;

    const KIT: &str = r#"
        samples:
          - id: kick-1
            name: Kick 1
            file: kick/kick-1.wav
            category: kick
          - id: hat-1
            file: /abs/hat-1.wav
            category: hihat
        pattern:
          id: basic
          name: Basic Beat
          step_count: 16
          tracks:
            - id: kick
              sample: kick-1
              hits: [0, 4, 8, 12]
            - id: hat
              sample: hat-1
              volume: 0.5
              pan: -0.3
              solo: true
              hits:
                - 2
                - step: 6
                  velocity: 0.4
            - id: empty
              category: fx
        "#;

    fn parse(yaml: &str) -> Result<Kit, ConfigError> {
        let kit = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Kit>()?;
        kit.validate()?;
        Ok(kit)
    }

    #[test]
    fn test_parse_kit() -> Result<(), Box<dyn Error>> {
        let kit = parse(KIT)?;

        let library = kit.library();
        assert_eq!(2, library.len());
        let kick = &library["kick-1"];
        assert_eq!("Kick 1", kick.name());
        assert_eq!("kick/kick-1.wav", kick.source());
        assert_eq!("kick", kick.category());
        assert_eq!("hat-1", library["hat-1"].name());

        let pattern = kit.pattern();
        assert_eq!("Basic Beat", pattern.name());
        assert_eq!(16, pattern.step_count());
        assert_eq!(3, pattern.tracks().len());

        let kick = &pattern.tracks()["kick"];
        let active: Vec<usize> = (0..16)
            .filter(|i| kick.step(*i).is_some_and(|s| s.active))
            .collect();
        assert_eq!(vec![0, 4, 8, 12], active);
        assert_eq!(0.8, kick.volume());

        let hat = &pattern.tracks()["hat"];
        assert!(hat.solo);
        assert!(!hat.mute);
        assert_eq!(0.5, hat.volume());
        assert_eq!(-0.3, hat.pan());
        assert_eq!(Some(1.0), hat.step(2).map(|s| s.velocity()));
        assert_eq!(Some(0.4), hat.step(6).map(|s| s.velocity()));

        let empty = &pattern.tracks()["empty"];
        assert_eq!(None, empty.sample_id());
        assert_eq!("fx", empty.category());
        Ok(())
    }

    #[test]
    fn test_default_step_count() -> Result<(), Box<dyn Error>> {
        let kit = parse("samples: []\npattern:\n  id: blank\n")?;
        assert_eq!(32, kit.pattern().step_count());
        assert!(kit.pattern().tracks().is_empty());
        Ok(())
    }

    #[test]
    fn test_invalid_kits() {
        let invalid = [
            // Zero steps.
            "samples: []\npattern: {id: p, step_count: 0}",
            // Hit past the end.
            "samples: [{id: k, file: k.wav}]\npattern: {id: p, step_count: 4, tracks: [{id: t, sample: k, hits: [4]}]}",
            // Unknown sample.
            "samples: []\npattern: {id: p, tracks: [{id: t, sample: nope}]}",
            // Duplicate samples.
            "samples: [{id: k, file: a.wav}, {id: k, file: b.wav}]\npattern: {id: p}",
            // Duplicate tracks.
            "samples: []\npattern: {id: p, tracks: [{id: t}, {id: t}]}",
        ];
        for yaml in invalid {
            assert!(
                matches!(parse(yaml), Err(ConfigError::Invalid(_))),
                "expected {} to be invalid",
                yaml
            );
        }
    }

    #[test]
    fn test_deserialize_sets_base_path() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("kit.yaml");
        std::fs::write(&path, KIT)?;

        let kit = Kit::deserialize(&path)?;
        assert_eq!(tempdir.path(), kit.base_path());
        Ok(())
    }
}
