//! Offline inspection of rendered metronome audio.
//!
//! A bounce is split into clicks on silence gaps, then each click gets its
//! level and dominant frequency from a zero-padded FFT.

use std::{f32::consts::PI, fmt, ops::Range, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{MetronomeError, Result};

/// Absolute sample level above which audio counts as part of a click.
pub const DEFAULT_ONSET_THRESHOLD: f32 = 1e-4;
/// Silence, in seconds, that separates two clicks.
pub const DEFAULT_MIN_GAP: f64 = 0.005;
const MIN_FFT_SIZE: usize = 4096;

/// Features of one detected click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickFeature {
    /// Onset in seconds from the start of the buffer.
    pub time: f64,
    pub duration: f64,
    pub rms: f32,
    pub peak: f32,
    /// Dominant frequency in Hz.
    pub frequency: f64,
}

/// Everything [`ClickAnalyzer::analyze`] found in one buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickReport {
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub clicks: Vec<ClickFeature>,
    /// Tempo implied by the mean onset spacing, when there are two clicks or
    /// more.
    pub tempo_bpm: Option<f64>,
}

impl ClickReport {
    /// Seconds between consecutive onsets.
    pub fn intervals(&self) -> Vec<f64> {
        self.clicks
            .windows(2)
            .map(|pair| pair[1].time - pair[0].time)
            .collect()
    }
}

pub struct ClickAnalyzer {
    sample_rate: u32,
    threshold: f32,
    min_gap: f64,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl ClickAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            threshold: DEFAULT_ONSET_THRESHOLD,
            min_gap: DEFAULT_MIN_GAP,
            planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.abs();
        self
    }

    pub fn with_min_gap(mut self, seconds: f64) -> Self {
        self.min_gap = seconds.max(0.0);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn analyze(&mut self, samples: &[f32]) -> Result<ClickReport> {
        let rate = self.sample_rate as f64;
        let mut clicks = Vec::new();

        for range in self.segment(samples) {
            let click = &samples[range.clone()];
            clicks.push(ClickFeature {
                time: range.start as f64 / rate,
                duration: range.len() as f64 / rate,
                rms: compute_rms(click),
                peak: click.iter().fold(0.0f32, |acc, s| acc.max(s.abs())),
                frequency: self.dominant_frequency(click)?,
            });
        }

        let mut report = ClickReport {
            sample_rate: self.sample_rate,
            duration_seconds: samples.len() as f64 / rate,
            clicks,
            tempo_bpm: None,
        };
        let intervals = report.intervals();
        if !intervals.is_empty() {
            let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
            if mean > 0.0 {
                report.tempo_bpm = Some(60.0 / mean);
            }
        }

        tracing::debug!(clicks = report.clicks.len(), tempo = ?report.tempo_bpm, "analysed bounce");
        Ok(report)
    }

    /// Sample ranges of the clicks in `samples`, in order.
    pub fn segment(&self, samples: &[f32]) -> Vec<Range<usize>> {
        let gap = ((self.min_gap * self.sample_rate as f64).ceil() as usize).max(1);
        let mut segments = Vec::new();
        let mut open: Option<usize> = None;
        let mut last_loud = 0;

        for (index, sample) in samples.iter().enumerate() {
            if sample.abs() > self.threshold {
                open.get_or_insert(index);
                last_loud = index;
            } else if let Some(start) = open {
                if index - last_loud >= gap {
                    segments.push(start..last_loud + 1);
                    open = None;
                }
            }
        }
        if let Some(start) = open {
            segments.push(start..last_loud + 1);
        }

        segments
    }

    /// Frequency of the strongest spectral peak, refined by parabolic
    /// interpolation between neighbouring bins.
    pub fn dominant_frequency(&mut self, samples: &[f32]) -> Result<f64> {
        if samples.len() < 2 {
            return Err(MetronomeError::Analysis(
                "dominant frequency needs at least two samples".into(),
            ));
        }

        let len = samples.len();
        let size = len.next_power_of_two().max(MIN_FFT_SIZE);
        let bin_hz = self.sample_rate as f64 / size as f64;
        let fft = self.prepare_fft(size);

        fft.input.fill(0.0);
        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let magnitudes: Vec<f32> = fft.spectrum.iter().map(|bin| bin.norm()).collect();
        let (peak, _) = magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .fold((0, 0.0f32), |best, (index, &magnitude)| {
                if magnitude > best.1 {
                    (index, magnitude)
                } else {
                    best
                }
            });

        if peak == 0 {
            return Ok(0.0);
        }

        let offset = match (magnitudes.get(peak - 1), magnitudes.get(peak + 1)) {
            (Some(&left), Some(&right)) => {
                let centre = magnitudes[peak];
                let denominator = left - 2.0 * centre + right;
                if denominator.abs() > f32::EPSILON {
                    (0.5 * (left - right) / denominator) as f64
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        Ok((peak as f64 + offset) * bin_hz)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let resources = match self.fft.take() {
            Some(existing) if existing.size == size => existing,
            _ => {
                let plan = self.planner.plan_fft_forward(size);
                FftResources {
                    size,
                    scratch: plan.make_scratch_vec(),
                    spectrum: plan.make_output_vec(),
                    input: plan.make_input_vec(),
                    plan,
                }
            }
        };
        self.fft.insert(resources)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for ClickAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("threshold", &self.threshold)
            .field("min_gap", &self.min_gap)
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
