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
use std::path::Path;
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use crate::samples::DEFAULT_MAX_CACHE_SIZE;
use crate::scheduler::{self, DEFAULT_BPM, DEFAULT_LOOKAHEAD, DEFAULT_SCHEDULE_AHEAD};

const DEFAULT_MASTER_VOLUME: f32 = 0.8;

/// The engine configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    audio: Audio,
    scheduler: Option<Scheduler>,
    cache: Option<Cache>,
    transport: Option<Transport>,
}

/// Scheduler timing.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Scheduler {
    /// How often a scheduling pass runs, e.g. "25ms".
    lookahead: Option<String>,
    /// How far ahead of the audio clock each pass schedules, e.g. "100ms".
    schedule_ahead: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Cache {
    /// The maximum number of decoded samples held in memory.
    max_size: Option<usize>,
}

/// Initial transport settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Transport {
    bpm: Option<f64>,
    /// Percent, 0 to 100.
    swing: Option<f64>,
    master_volume: Option<f32>,
}

fn parse_duration(
    field: &str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))?
            .into()),
        None => Ok(default),
    }
}

impl EngineConfig {
    /// Creates an engine config with defaults for everything but the audio device.
    pub fn new(audio: Audio) -> EngineConfig {
        EngineConfig {
            audio,
            scheduler: None,
            cache: None,
            transport: None,
        }
    }

    /// Parses and validates an engine config from a YAML file.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde can't.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate() == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".to_string()));
        }
        if self.audio.channels() == 0 {
            return Err(ConfigError::Invalid("channels must be positive".to_string()));
        }
        if self.max_cache_size() == 0 {
            return Err(ConfigError::Invalid(
                "cache max_size must be at least 1".to_string(),
            ));
        }
        if self.lookahead()?.is_zero() {
            return Err(ConfigError::Invalid("lookahead must be positive".to_string()));
        }
        if self.schedule_ahead()? <= self.lookahead()? {
            return Err(ConfigError::Invalid(
                "schedule_ahead must be longer than lookahead".to_string(),
            ));
        }
        scheduler::step_duration(self.bpm()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let master_volume = self.master_volume();
        if !master_volume.is_finite() || master_volume < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "master_volume {} must not be negative",
                master_volume
            )));
        }
        Ok(())
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Returns the scheduler timer period (default: 25ms).
    pub fn lookahead(&self) -> Result<Duration, ConfigError> {
        let scheduler = self.scheduler.clone().unwrap_or_default();
        parse_duration("lookahead", &scheduler.lookahead, DEFAULT_LOOKAHEAD)
    }

    /// Returns the schedule-ahead window (default: 100ms).
    pub fn schedule_ahead(&self) -> Result<Duration, ConfigError> {
        let scheduler = self.scheduler.clone().unwrap_or_default();
        parse_duration(
            "schedule_ahead",
            &scheduler.schedule_ahead,
            DEFAULT_SCHEDULE_AHEAD,
        )
    }

    /// Returns the maximum number of loaded samples (default: 200).
    pub fn max_cache_size(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|cache| cache.max_size)
            .unwrap_or(DEFAULT_MAX_CACHE_SIZE)
    }

    /// Returns the initial tempo (default: 120).
    pub fn bpm(&self) -> f64 {
        self.transport
            .as_ref()
            .and_then(|transport| transport.bpm)
            .unwrap_or(DEFAULT_BPM)
    }

    /// Returns the initial swing in percent (default: 0).
    pub fn swing(&self) -> f64 {
        self.transport
            .as_ref()
            .and_then(|transport| transport.swing)
            .unwrap_or(0.0)
    }

    /// Returns the initial master volume (default: 0.8).
    pub fn master_volume(&self) -> f32 {
        self.transport
            .as_ref()
            .and_then(|transport| transport.master_volume)
            .unwrap_or(DEFAULT_MASTER_VOLUME)
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use config::FileFormat;

    use super::*;

    fn parse(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let config = parse(
            r#"
            audio:
              device: mock-device
            "#,
        )?;

        assert_eq!("mock-device", config.audio().device());
        assert_eq!(44100, config.audio().sample_rate());
        assert_eq!(2, config.audio().channels());
        assert_eq!(Duration::from_millis(25), config.lookahead()?);
        assert_eq!(Duration::from_millis(100), config.schedule_ahead()?);
        assert_eq!(200, config.max_cache_size());
        assert_eq!(120.0, config.bpm());
        assert_eq!(0.0, config.swing());
        assert_eq!(0.8, config.master_volume());
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let config = parse(
            r#"
            audio:
              device: UltraLite-mk5
              sample_rate: 48000
              channels: 4
            scheduler:
              lookahead: 10ms
              schedule_ahead: 150ms
            cache:
              max_size: 16
            transport:
              bpm: 146
              swing: 20
              master_volume: 0.5
            "#,
        )?;

        assert_eq!("UltraLite-mk5", config.audio().device());
        assert_eq!(48000, config.audio().sample_rate());
        assert_eq!(4, config.audio().channels());
        assert_eq!(Duration::from_millis(10), config.lookahead()?);
        assert_eq!(Duration::from_millis(150), config.schedule_ahead()?);
        assert_eq!(16, config.max_cache_size());
        assert_eq!(146.0, config.bpm());
        assert_eq!(20.0, config.swing());
        assert_eq!(0.5, config.master_volume());
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        let invalid = [
            "audio: {device: mock}\ncache: {max_size: 0}",
            "audio: {device: mock}\nscheduler: {lookahead: soon}",
            "audio: {device: mock}\nscheduler: {lookahead: 200ms, schedule_ahead: 100ms}",
            "audio: {device: mock}\ntransport: {bpm: 0}",
            "audio: {device: mock}\ntransport: {bpm: 1.0e+20}",
            "audio: {device: mock}\ntransport: {bpm: 1000}",
            "audio: {device: mock}\ntransport: {master_volume: -1}",
            "audio: {device: mock, channels: 0}",
        ];
        for yaml in invalid {
            assert!(
                matches!(parse(yaml), Err(ConfigError::Invalid(_))),
                "expected {} to be invalid",
                yaml
            );
        }

        assert!(matches!(parse("cache: {max_size: 2}"), Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_deserialize_file() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("engine.yaml");
        std::fs::write(&path, "audio:\n  device: mock\ntransport:\n  bpm: 90\n")?;

        let config = EngineConfig::deserialize(&path)?;
        assert_eq!(90.0, config.bpm());

        assert!(EngineConfig::deserialize(&tempdir.path().join("missing.yaml")).is_err());
        Ok(())
    }
}
