//! Software implementation of the host audio API.
//!
//! Sine tone generators feed gain nodes which feed the destination. The clock
//! is the number of rendered frames, so the same host works for offline
//! bounces and behind a real-time output stream.

use std::{
    collections::BTreeMap,
    f64::consts::TAU,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{AudioHost, GainHandle, ParamTimeline, Sink, ToneHandle};
use crate::Clock;

const DEFAULT_FREQUENCY: f64 = 440.0;
const MAX_CHAIN_DEPTH: usize = 16;

#[derive(Debug)]
struct ToneGenerator {
    frequency: ParamTimeline,
    start: Option<f64>,
    stop: Option<f64>,
    output: Option<Sink>,
    phase: f64,
}

impl ToneGenerator {
    fn new() -> Self {
        Self {
            frequency: ParamTimeline::new(DEFAULT_FREQUENCY),
            start: None,
            stop: None,
            output: None,
            phase: 0.0,
        }
    }

    fn is_sounding(&self, time: f64) -> bool {
        let started = self.start.map(|start| start <= time).unwrap_or(false);
        let stopped = self.stop.map(|stop| stop <= time).unwrap_or(false);
        started && !stopped
    }

    fn is_finished(&self, time: f64) -> bool {
        self.stop.map(|stop| stop <= time).unwrap_or(false)
    }
}

#[derive(Debug)]
struct GainNode {
    gain: ParamTimeline,
    output: Option<Sink>,
}

/// Renders the node graph one frame at a time.
pub struct SoftwareSynth {
    sample_rate: u32,
    frames: u64,
    next_id: u64,
    tones: BTreeMap<ToneHandle, ToneGenerator>,
    gains: BTreeMap<GainHandle, GainNode>,
}

impl SoftwareSynth {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames: 0,
            next_id: 0,
            tones: BTreeMap::new(),
            gains: BTreeMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Number of tone generators that have not finished yet, including
    /// pre-allocated ones that were never started.
    pub fn live_tones(&self) -> usize {
        self.tones.len()
    }

    /// Mixes every sounding tone into `out` (overwriting it) and advances the
    /// clock by `out.len()` frames.
    pub fn render_into(&mut self, out: &mut [f32]) {
        let rate = self.sample_rate as f64;
        let gains = &self.gains;

        for (offset, sample) in out.iter_mut().enumerate() {
            let time = (self.frames + offset as u64) as f64 / rate;
            let mut mix = 0.0;

            for tone in self.tones.values_mut() {
                if !tone.is_sounding(time) {
                    continue;
                }
                let amplitude = tone
                    .output
                    .map(|sink| chain_gain(gains, sink, time, 0))
                    .unwrap_or(0.0);
                mix += tone.phase.sin() * amplitude;
                tone.phase = (tone.phase + TAU * tone.frequency.value_at(time) / rate) % TAU;
            }

            *sample = mix as f32;
        }

        self.frames += out.len() as u64;
        let now = self.current_time();
        self.tones.retain(|_, tone| !tone.is_finished(now));
        for tone in self.tones.values_mut() {
            tone.frequency.prune_before(now);
        }
        for node in self.gains.values_mut() {
            node.gain.prune_before(now);
        }
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn chain_gain(gains: &BTreeMap<GainHandle, GainNode>, sink: Sink, time: f64, depth: usize) -> f64 {
    match sink {
        Sink::Destination => 1.0,
        Sink::Gain(_) if depth >= MAX_CHAIN_DEPTH => 0.0,
        Sink::Gain(handle) => match gains.get(&handle) {
            Some(node) => {
                let downstream = node
                    .output
                    .map(|next| chain_gain(gains, next, time, depth + 1))
                    .unwrap_or(0.0);
                node.gain.value_at(time) * downstream
            }
            None => 0.0,
        },
    }
}

impl fmt::Debug for SoftwareSynth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSynth")
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames)
            .field("tones", &self.tones.len())
            .field("gains", &self.gains.len())
            .finish()
    }
}

/// Shared handle to a [`SoftwareSynth`]. Clones drive the same graph, so the
/// scheduler and an output stream can hold one each.
#[derive(Debug, Clone)]
pub struct SynthHost {
    shared: Arc<Mutex<SoftwareSynth>>,
}

impl SynthHost {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SoftwareSynth::new(sample_rate))),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate()
    }

    pub fn live_tones(&self) -> usize {
        self.lock().live_tones()
    }

    pub fn render_into(&self, out: &mut [f32]) {
        self.lock().render_into(out);
    }

    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.render_into(&mut out);
        out
    }

    /// Renders `seconds` of audio in blocks of `block_size` frames, calling
    /// `between_blocks` before each block. The callback is where a scheduler
    /// gets serviced during an offline bounce.
    pub fn render_with(
        &self,
        seconds: f64,
        block_size: usize,
        mut between_blocks: impl FnMut(),
    ) -> Vec<f32> {
        let total = (seconds.max(0.0) * self.sample_rate() as f64).round() as usize;
        let block_size = block_size.max(1);
        let mut out = vec![0.0; total];

        for block in out.chunks_mut(block_size) {
            between_blocks();
            self.render_into(block);
        }
        out
    }

    // Scheduling is infallible, so a poisoned lock is recovered rather than
    // reported.
    fn lock(&self) -> MutexGuard<'_, SoftwareSynth> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for SynthHost {
    fn now(&self) -> f64 {
        self.lock().current_time()
    }
}

impl AudioHost for SynthHost {
    fn create_tone_generator(&mut self) -> ToneHandle {
        let mut synth = self.lock();
        let handle = ToneHandle(synth.allocate());
        synth.tones.insert(handle, ToneGenerator::new());
        handle
    }

    fn create_gain(&mut self) -> GainHandle {
        let mut synth = self.lock();
        let handle = GainHandle(synth.allocate());
        synth.gains.insert(
            handle,
            GainNode {
                gain: ParamTimeline::new(1.0),
                output: None,
            },
        );
        handle
    }

    fn connect_tone(&mut self, tone: ToneHandle, sink: Sink) {
        if let Some(generator) = self.lock().tones.get_mut(&tone) {
            generator.output = Some(sink);
        }
    }

    fn connect_gain(&mut self, gain: GainHandle, sink: Sink) {
        if let Some(node) = self.lock().gains.get_mut(&gain) {
            node.output = Some(sink);
        }
    }

    fn set_gain(&mut self, gain: GainHandle, value: f64, at: f64) {
        if let Some(node) = self.lock().gains.get_mut(&gain) {
            node.gain.set_value_at(value, at);
        }
    }

    fn ramp_gain(&mut self, gain: GainHandle, target: f64, at: f64) {
        if let Some(node) = self.lock().gains.get_mut(&gain) {
            node.gain.linear_ramp_to(target, at);
        }
    }

    fn cancel_gain_values(&mut self, gain: GainHandle) {
        if let Some(node) = self.lock().gains.get_mut(&gain) {
            node.gain.cancel_all();
        }
    }

    fn set_frequency(&mut self, tone: ToneHandle, hz: f64, at: f64) {
        if let Some(generator) = self.lock().tones.get_mut(&tone) {
            generator.frequency.set_value_at(hz, at);
        }
    }

    fn cancel_frequency_values(&mut self, tone: ToneHandle) {
        if let Some(generator) = self.lock().tones.get_mut(&tone) {
            generator.frequency.cancel_all();
        }
    }

    fn start(&mut self, tone: ToneHandle, at: f64) {
        if let Some(generator) = self.lock().tones.get_mut(&tone) {
            generator.start.get_or_insert(at);
        }
    }

    fn stop(&mut self, tone: ToneHandle, at: f64) {
        if let Some(generator) = self.lock().tones.get_mut(&tone) {
            generator.stop = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn clock_follows_rendered_frames() {
        let host = SynthHost::new(1_000);
        assert_eq!(host.now(), 0.0);

        host.render(250);
        assert_eq!(host.now(), 0.25);
    }

    #[test]
    fn unconnected_tone_is_silent() {
        let mut host = SynthHost::new(8_000);
        let tone = host.create_tone_generator();
        host.start(tone, 0.0);

        assert_eq!(peak(&host.render(800)), 0.0);
    }

    #[test]
    fn tone_sounds_only_between_start_and_stop() {
        let mut host = SynthHost::new(8_000);
        let gain = host.create_gain();
        host.connect_gain(gain, Sink::Destination);
        let tone = host.create_tone_generator();
        host.connect_tone(tone, Sink::Gain(gain));
        host.set_frequency(tone, 500.0, 0.0);
        host.start(tone, 0.1);
        host.stop(tone, 0.2);

        let out = host.render(2_400);
        assert_eq!(peak(&out[..800]), 0.0);
        assert!(peak(&out[800..1_600]) > 0.9);
        assert_eq!(peak(&out[1_600..]), 0.0);
        assert_eq!(host.live_tones(), 0);
    }

    #[test]
    fn gain_chain_multiplies() {
        let mut host = SynthHost::new(8_000);
        let master = host.create_gain();
        host.connect_gain(master, Sink::Destination);
        host.set_gain(master, 0.25, 0.0);
        let envelope = host.create_gain();
        host.connect_gain(envelope, Sink::Gain(master));
        host.set_gain(envelope, 2.0, 0.0);
        let tone = host.create_tone_generator();
        host.connect_tone(tone, Sink::Gain(envelope));
        host.start(tone, 0.0);

        let level = peak(&host.render(800));
        assert!((level - 0.5).abs() < 0.01, "peak was {level}");
    }

    #[test]
    fn render_with_calls_back_per_block() {
        let host = SynthHost::new(1_000);
        let mut calls = 0;
        let out = host.render_with(0.1, 30, || calls += 1);

        assert_eq!(out.len(), 100);
        assert_eq!(calls, 4);
    }
}
