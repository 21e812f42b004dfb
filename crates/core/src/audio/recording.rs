//! Host that journals every call instead of producing sound.
//!
//! Used by tests to assert exactly what reached the audio layer, and by the
//! CLI's silent backend where the journal is bounded and only logged.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{AudioHost, GainHandle, Sink, ToneHandle};
use crate::{Clock, ManualClock};

const DEFAULT_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    CreateTone(ToneHandle),
    CreateGain(GainHandle),
    ConnectTone { tone: ToneHandle, sink: Sink },
    ConnectGain { gain: GainHandle, sink: Sink },
    SetGain { gain: GainHandle, value: f64, at: f64 },
    RampGain { gain: GainHandle, target: f64, at: f64 },
    CancelGain(GainHandle),
    SetFrequency { tone: ToneHandle, hz: f64, at: f64 },
    CancelFrequency(ToneHandle),
    Start { tone: ToneHandle, at: f64 },
    Stop { tone: ToneHandle, at: f64 },
}

/// Everything the journal knows about one started tone generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneRecord {
    pub tone: ToneHandle,
    pub frequency: Option<f64>,
    pub start: f64,
    pub stop: Option<f64>,
}

#[derive(Debug)]
struct Journal {
    next_id: u64,
    capacity: usize,
    calls: VecDeque<HostCall>,
}

impl Journal {
    fn record(&mut self, call: HostCall) {
        if self.calls.len() == self.capacity {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone)]
pub struct RecordingHost<C = ManualClock> {
    clock: C,
    journal: Arc<Mutex<Journal>>,
}

impl RecordingHost<ManualClock> {
    /// Host driven by a manual clock starting at zero.
    pub fn new() -> Self {
        Self::with_clock(ManualClock::new())
    }

    pub fn advance(&self, delta: f64) {
        self.clock.advance(delta);
    }

    pub fn set_time(&self, seconds: f64) {
        self.clock.set(seconds);
    }
}

impl Default for RecordingHost<ManualClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RecordingHost<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_capacity(clock, DEFAULT_CAPACITY)
    }

    /// Keeps only the most recent `capacity` calls.
    pub fn with_capacity(clock: C, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            clock,
            journal: Arc::new(Mutex::new(Journal {
                next_id: 0,
                capacity,
                calls: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            })),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// Started tones in the order their `start` was scheduled.
    pub fn tones(&self) -> Vec<ToneRecord> {
        let journal = self.lock();
        let mut tones: Vec<ToneRecord> = Vec::new();
        let mut frequencies: Vec<(ToneHandle, f64)> = Vec::new();

        for call in &journal.calls {
            match *call {
                HostCall::SetFrequency { tone, hz, .. } => frequencies.push((tone, hz)),
                HostCall::CancelFrequency(tone) => frequencies.retain(|(t, _)| *t != tone),
                HostCall::Start { tone, at } => tones.push(ToneRecord {
                    tone,
                    frequency: frequencies
                        .iter()
                        .rev()
                        .find(|(t, _)| *t == tone)
                        .map(|(_, hz)| *hz),
                    start: at,
                    stop: None,
                }),
                HostCall::Stop { tone, at } => {
                    if let Some(record) = tones.iter_mut().rev().find(|r| r.tone == tone) {
                        record.stop = Some(at);
                    }
                }
                _ => {}
            }
        }
        tones
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: HostCall) {
        self.lock().record(call);
    }
}

impl<C: Clock> Clock for RecordingHost<C> {
    fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl<C: Clock> AudioHost for RecordingHost<C> {
    fn create_tone_generator(&mut self) -> ToneHandle {
        let mut journal = self.lock();
        let tone = ToneHandle(journal.allocate());
        journal.record(HostCall::CreateTone(tone));
        tone
    }

    fn create_gain(&mut self) -> GainHandle {
        let mut journal = self.lock();
        let gain = GainHandle(journal.allocate());
        journal.record(HostCall::CreateGain(gain));
        gain
    }

    fn connect_tone(&mut self, tone: ToneHandle, sink: Sink) {
        self.record(HostCall::ConnectTone { tone, sink });
    }

    fn connect_gain(&mut self, gain: GainHandle, sink: Sink) {
        self.record(HostCall::ConnectGain { gain, sink });
    }

    fn set_gain(&mut self, gain: GainHandle, value: f64, at: f64) {
        self.record(HostCall::SetGain { gain, value, at });
    }

    fn ramp_gain(&mut self, gain: GainHandle, target: f64, at: f64) {
        self.record(HostCall::RampGain { gain, target, at });
    }

    fn cancel_gain_values(&mut self, gain: GainHandle) {
        self.record(HostCall::CancelGain(gain));
    }

    fn set_frequency(&mut self, tone: ToneHandle, hz: f64, at: f64) {
        self.record(HostCall::SetFrequency { tone, hz, at });
    }

    fn cancel_frequency_values(&mut self, tone: ToneHandle) {
        self.record(HostCall::CancelFrequency(tone));
    }

    fn start(&mut self, tone: ToneHandle, at: f64) {
        self.record(HostCall::Start { tone, at });
    }

    fn stop(&mut self, tone: ToneHandle, at: f64) {
        self.record(HostCall::Stop { tone, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journals_calls_in_order() {
        let mut host = RecordingHost::new();
        let gain = host.create_gain();
        let tone = host.create_tone_generator();
        host.connect_tone(tone, Sink::Gain(gain));

        assert_eq!(
            host.calls(),
            vec![
                HostCall::CreateGain(gain),
                HostCall::CreateTone(tone),
                HostCall::ConnectTone {
                    tone,
                    sink: Sink::Gain(gain)
                },
            ]
        );
    }

    #[test]
    fn clones_share_clock_and_journal() {
        let mut host = RecordingHost::new();
        let observer = host.clone();

        host.advance(0.5);
        host.create_gain();

        assert_eq!(observer.now(), 0.5);
        assert_eq!(observer.call_count(), 1);
    }

    #[test]
    fn collects_started_tones() {
        let mut host = RecordingHost::new();
        let tone = host.create_tone_generator();
        host.set_frequency(tone, 440.0, 0.9);
        host.start(tone, 0.9);
        host.stop(tone, 1.2);
        host.create_tone_generator();

        let tones = host.tones();
        assert_eq!(tones.len(), 1);
        assert_eq!(tones[0].frequency, Some(440.0));
        assert_eq!(tones[0].start, 0.9);
        assert_eq!(tones[0].stop, Some(1.2));
    }

    #[test]
    fn bounded_journal_drops_oldest_calls() {
        let mut host = RecordingHost::with_capacity(ManualClock::new(), 2);
        let first = host.create_gain();
        host.create_gain();
        host.create_gain();

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls.contains(&HostCall::CreateGain(first)));
    }
}
