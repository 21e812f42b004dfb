use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{MetronomeError, Result, Rhythm};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub tone: ToneConfig,
    pub tap: TapConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing sections fall back to their
    /// defaults; the result is validated before it is returned.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::info!(path = ?path.as_ref(), "loaded configuration");
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Rejects values the scheduler and estimator treat as preconditions.
    pub fn validate(&self) -> Result<()> {
        Rhythm::new(self.session.tempo, self.session.beats)?;

        let positive = [
            ("scheduler.poll_interval", self.scheduler.poll_interval),
            ("scheduler.lookahead", self.scheduler.lookahead),
            ("scheduler.preview_tempo", self.scheduler.preview_tempo),
            ("tone.base_frequency", self.tone.base_frequency),
            ("tone.first_beat_gain", self.tone.first_beat_gain),
            ("tone.beat_gain", self.tone.beat_gain),
            ("tone.first_beat_duration", self.tone.first_beat_duration),
            ("tone.beat_duration", self.tone.beat_duration),
            ("tap.silence_timeout_ms", self.tap.silence_timeout_ms),
            ("tap.outlier_sigma", self.tap.outlier_sigma),
            ("session.max_tempo", self.session.max_tempo),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MetronomeError::msg(format!(
                    "`{name}` must be a positive number, got {value}"
                )));
            }
        }

        if self.tap.min_samples < 2 {
            return Err(MetronomeError::msg("`tap.min_samples` must be at least 2"));
        }
        if self.audio.sample_rate == 0 || self.audio.block_size == 0 {
            return Err(MetronomeError::msg(
                "`audio.sample_rate` and `audio.block_size` must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Timing of the lookahead polling loop. All values are in seconds of host
/// clock time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between two polling passes.
    pub poll_interval: f64,
    /// An event is handed to the sound emitter once it is this close.
    pub lookahead: f64,
    /// Offset from "now" used when a beat must sound as soon as possible.
    pub immediate_delay: f64,
    /// A retimed beat only moves earlier when it gains more than this.
    pub retime_threshold: f64,
    /// Tempo used to shape the standalone preview tone.
    pub preview_tempo: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 0.010,
            lookahead: 0.1,
            immediate_delay: 0.02,
            retime_threshold: 0.3,
            preview_tempo: 120.0,
        }
    }
}

/// Shape of a single click.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToneConfig {
    /// Pitch of regular beats in Hz; the first beat of a bar plays an octave up.
    pub base_frequency: f64,
    pub first_beat_gain: f64,
    pub beat_gain: f64,
    pub first_beat_duration: f64,
    pub beat_duration: f64,
    /// Tones start this much before their beat time.
    pub start_offset: f64,
    /// Upper bound of a click relative to the beat interval.
    pub max_duration_ratio: f64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            base_frequency: 864.0,
            first_beat_gain: 4.0,
            beat_gain: 3.0,
            first_beat_duration: 0.02,
            beat_duration: 0.03,
            start_offset: 0.001,
            max_duration_ratio: 0.7,
        }
    }
}

/// Tap tempo estimation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TapConfig {
    /// Number of intervals required before a tempo is stabilized.
    pub min_samples: usize,
    /// A longer gap between taps starts a new measurement.
    pub silence_timeout_ms: f64,
    /// Intervals further than this many deviations from the mean are outliers.
    pub outlier_sigma: f64,
    /// Relative tempo change below which a new tempo is not reported.
    pub tempo_hysteresis: f64,
    /// Lower bound of the deviation used for outlier checks, relative to the
    /// mean interval.
    pub min_deviation_ratio: f64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            min_samples: 4,
            silence_timeout_ms: 2000.0,
            outlier_sigma: 3.0,
            tempo_hysteresis: 0.02,
            min_deviation_ratio: 0.02,
        }
    }
}

/// Initial state of a metronome session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub tempo: f64,
    pub beats: u32,
    /// Multipliers that would push the tempo to this value are ignored.
    pub max_tempo: f64,
    /// Play a preview click on taps that do not settle the tempo.
    pub preview_on_tap: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            beats: 4,
            max_tempo: 500.0,
            preview_on_tap: true,
        }
    }
}

/// Configuration specific to the software synth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frames rendered between two scheduler passes when bouncing offline.
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 480,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timing() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.poll_interval, 0.010);
        assert_eq!(config.scheduler.lookahead, 0.1);
        assert_eq!(config.scheduler.retime_threshold, 0.3);
        assert_eq!(config.tone.start_offset, 0.001);
        assert_eq!(config.tap.min_samples, 4);
        assert_eq!(config.session.tempo, 120.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "session": { "tempo": 90.0 }, "tap": { "min_samples": 6 } }"#)
                .unwrap();

        assert_eq!(config.session.tempo, 90.0);
        assert_eq!(config.session.beats, 4);
        assert_eq!(config.tap.min_samples, 6);
        assert_eq!(config.tone, ToneConfig::default());
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let mut config = AppConfig::default();
        config.session.tempo = 0.0;
        assert!(matches!(
            config.validate(),
            Err(MetronomeError::InvalidRhythm { .. })
        ));
    }

    #[test]
    fn rejects_nan_gain() {
        let mut config = AppConfig::default();
        config.tone.beat_gain = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("tone.beat_gain"));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!(
            "metronome-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "session": { "beats": 3 } }"#).unwrap();

        let config = AppConfig::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.session.beats, 3);
    }
}
