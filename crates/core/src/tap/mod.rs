//! Tap tempo estimation.
//!
//! Intervals between taps go into a short rolling window. Until the window
//! holds `min_samples` intervals the estimator reports a provisional
//! estimate; afterwards it rejects outliers against the window statistics and
//! reports a stabilized tempo, suppressing changes smaller than the
//! hysteresis.

pub mod stats;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{config::TapConfig, Clock, SystemClock};

pub use stats::{RunningStats, Summary};

/// Notifications produced by a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapEvent {
    /// Every tap is acknowledged.
    Tap,
    /// Provisional tempo from too few samples.
    Estimate(u32),
    /// Stabilized tempo.
    Tempo(u32),
}

/// What a single tap did to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bpm", rename_all = "snake_case")]
pub enum TapOutcome {
    /// First tap of a measurement; no interval yet.
    Started,
    /// The gap since the previous tap exceeded the silence timeout. The
    /// measurement was discarded; the next tap starts a new one.
    TimedOut,
    /// The interval did not fit the window; the measurement was discarded.
    Outlier,
    /// Not after the previous tap, or not a finite timestamp; ignored.
    Ignored,
    Estimate(u32),
    /// A new stabilized tempo.
    Tempo(u32),
    /// Consistent with the stabilized tempo, which is unchanged.
    Steady(u32),
}

impl TapOutcome {
    /// Events to publish: always [`TapEvent::Tap`], then at most one
    /// estimate or tempo.
    pub fn events(&self) -> impl Iterator<Item = TapEvent> {
        let extra = match *self {
            Self::Estimate(bpm) => Some(TapEvent::Estimate(bpm)),
            Self::Tempo(bpm) => Some(TapEvent::Tempo(bpm)),
            _ => None,
        };
        std::iter::once(TapEvent::Tap).chain(extra)
    }
}

fn interval_to_bpm(interval_ms: f64) -> u32 {
    (60_000.0 / interval_ms).round() as u32
}

/// Converts tap timestamps into a tempo.
#[derive(Debug)]
pub struct TapEstimator<C = SystemClock> {
    clock: C,
    config: TapConfig,
    intervals: VecDeque<f64>,
    cached: Option<Summary>,
    last_tap: Option<f64>,
    tempo: Option<u32>,
}

impl<C: Clock> TapEstimator<C> {
    pub fn new(clock: C, config: TapConfig) -> Self {
        let capacity = config.min_samples * 2 + 1;
        Self {
            clock,
            config,
            intervals: VecDeque::with_capacity(capacity),
            cached: None,
            last_tap: None,
            tempo: None,
        }
    }

    /// Stabilized tempo, if one has been reported since the last reset.
    pub fn tempo(&self) -> Option<u32> {
        self.tempo
    }

    /// Number of intervals currently in the window.
    pub fn samples(&self) -> usize {
        self.intervals.len()
    }

    /// Window statistics from the last stabilization pass.
    pub fn summary(&self) -> Option<Summary> {
        self.cached
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Records a tap at the current clock time.
    pub fn tap(&mut self) -> TapOutcome {
        let now_ms = self.clock.now() * 1000.0;
        self.tap_at(now_ms)
    }

    /// Records a tap at `timestamp_ms`.
    pub fn tap_at(&mut self, timestamp_ms: f64) -> TapOutcome {
        if !timestamp_ms.is_finite() {
            tracing::debug!(timestamp_ms, "ignoring non-finite tap timestamp");
            return TapOutcome::Ignored;
        }

        let Some(last) = self.last_tap else {
            self.last_tap = Some(timestamp_ms);
            return TapOutcome::Started;
        };

        let interval = timestamp_ms - last;
        if interval <= 0.0 {
            return TapOutcome::Ignored;
        }

        if interval > self.config.silence_timeout_ms {
            tracing::debug!(interval, "tap after silence, restarting measurement");
            self.reset();
            return TapOutcome::TimedOut;
        }

        self.last_tap = Some(timestamp_ms);
        self.intervals.push_back(interval);
        self.estimate(interval)
    }

    /// Forgets every sample, the cached statistics, the last tap and the
    /// stabilized tempo.
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.cached = None;
        self.last_tap = None;
        self.tempo = None;
    }

    fn estimate(&mut self, interval: f64) -> TapOutcome {
        let min_samples = self.config.min_samples;
        if self.intervals.len() < min_samples {
            let mean = RunningStats::from_iter(&self.intervals).mean();
            return self.provisional(mean.unwrap_or(interval));
        }

        // The previous pass's statistics exclude the new interval; on the
        // first pass there are none and the whole window is used.
        let reference = match self.cached {
            Some(summary) => summary,
            None => match RunningStats::from_iter(&self.intervals).summary() {
                Some(summary) => summary,
                None => return self.provisional(interval),
            },
        };
        let deviation = reference
            .std_dev
            .max(reference.mean * self.config.min_deviation_ratio);
        let limit = self.config.outlier_sigma * deviation;

        if (interval - reference.mean).abs() > limit {
            tracing::debug!(interval, mean = reference.mean, limit, "outlier tap, restarting measurement");
            self.reset();
            return TapOutcome::Outlier;
        }

        while self.intervals.len() > min_samples * 2 {
            self.intervals.pop_front();
        }
        self.intervals
            .retain(|sample| (sample - reference.mean).abs() <= limit);

        let stats = RunningStats::from_iter(&self.intervals);
        self.cached = stats.summary();
        let mean = stats.mean().unwrap_or(interval);

        if self.intervals.len() < min_samples {
            return self.provisional(mean);
        }

        let bpm = interval_to_bpm(mean);
        match self.tempo {
            Some(previous)
                if (bpm as f64 - previous as f64).abs()
                    <= previous as f64 * self.config.tempo_hysteresis =>
            {
                TapOutcome::Steady(previous)
            }
            _ => {
                tracing::info!(bpm, samples = self.intervals.len(), "tap tempo stabilized");
                self.tempo = Some(bpm);
                TapOutcome::Tempo(bpm)
            }
        }
    }

    // Once a tempo has been stabilized a short window never downgrades it to
    // an estimate again.
    fn provisional(&self, mean: f64) -> TapOutcome {
        match self.tempo {
            Some(tempo) => TapOutcome::Steady(tempo),
            None => TapOutcome::Estimate(interval_to_bpm(mean)),
        }
    }
}
