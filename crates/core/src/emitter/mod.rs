//! Turns a beat into one audible click on the host.

use crate::{
    audio::{AudioHost, GainHandle, Sink, ToneHandle},
    config::ToneConfig,
};

/// Parameters of a single click, derived from the beat index and tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickShape {
    pub frequency: f64,
    pub gain: f64,
    pub duration: f64,
}

impl ClickShape {
    /// The first beat of a bar plays an octave higher, louder and shorter.
    pub fn for_beat(config: &ToneConfig, beat: u32, tempo: f64) -> Self {
        let downbeat = beat == 1;
        let beat_interval = 60.0 / tempo;
        let (frequency, gain, fixed_duration) = if downbeat {
            (
                config.base_frequency * 2.0,
                config.first_beat_gain,
                config.first_beat_duration,
            )
        } else {
            (config.base_frequency, config.beat_gain, config.beat_duration)
        };

        Self {
            frequency,
            gain,
            duration: (beat_interval * config.max_duration_ratio).min(fixed_duration),
        }
    }
}

/// Owns the envelope chain on the host and the next tone generator.
///
/// Graph: `tone -> envelope -> master -> destination`. The master gain
/// normalises the loudest click to unity.
#[derive(Debug)]
pub struct SoundEmitter<H> {
    host: H,
    config: ToneConfig,
    envelope: GainHandle,
    master: GainHandle,
    pending: ToneHandle,
}

impl<H: AudioHost> SoundEmitter<H> {
    pub fn new(mut host: H, config: ToneConfig) -> Self {
        let master = host.create_gain();
        host.connect_gain(master, Sink::Destination);
        let loudest = config.first_beat_gain.max(config.beat_gain);
        host.set_gain(master, 1.0 / loudest, 0.0);

        let envelope = host.create_gain();
        host.connect_gain(envelope, Sink::Gain(master));

        let pending = host.create_tone_generator();
        host.connect_tone(pending, Sink::Gain(envelope));

        Self {
            host,
            config,
            envelope,
            master,
            pending,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &ToneConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.host.now()
    }

    pub fn master(&self) -> GainHandle {
        self.master
    }

    /// Schedules one click for `beat` at `time` and returns its shape.
    pub fn emit(&mut self, beat: u32, time: f64, tempo: f64) -> ClickShape {
        let shape = ClickShape::for_beat(&self.config, beat, tempo);
        let tone = self.take_tone();
        let offset = self.config.start_offset;
        let end = time + shape.duration - offset;

        self.host.cancel_gain_values(self.envelope);
        self.host.cancel_frequency_values(tone);

        self.host.set_frequency(tone, shape.frequency, time - offset);
        self.host.set_gain(self.envelope, 0.0, time - offset);
        self.host.ramp_gain(self.envelope, shape.gain, time);
        self.host.ramp_gain(self.envelope, 0.0, end);

        self.host.start(tone, time - offset);
        self.host.stop(tone, end);

        tracing::trace!(beat, time, tempo, frequency = shape.frequency, "click scheduled");
        shape
    }

    // Hands out the pre-allocated generator and allocates its successor so
    // the next click does not pay for creation.
    fn take_tone(&mut self) -> ToneHandle {
        let next = self.host.create_tone_generator();
        self.host.connect_tone(next, Sink::Gain(self.envelope));
        std::mem::replace(&mut self.pending, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{HostCall, RecordingHost};

    fn emitter() -> (RecordingHost, SoundEmitter<RecordingHost>) {
        let host = RecordingHost::new();
        let emitter = SoundEmitter::new(host.clone(), ToneConfig::default());
        (host, emitter)
    }

    #[test]
    fn downbeat_is_an_octave_up_and_louder() {
        let config = ToneConfig::default();
        let first = ClickShape::for_beat(&config, 1, 120.0);
        let other = ClickShape::for_beat(&config, 2, 120.0);

        assert_eq!(first.frequency, 1728.0);
        assert_eq!(other.frequency, 864.0);
        assert_eq!(first.gain, 4.0);
        assert_eq!(other.gain, 3.0);
        assert_eq!(first.duration, 0.02);
        assert_eq!(other.duration, 0.03);
    }

    #[test]
    fn fast_tempo_shortens_clicks() {
        let config = ToneConfig::default();
        // 3000 bpm leaves a 20ms interval, 70% of it is 14ms.
        let shape = ClickShape::for_beat(&config, 2, 3000.0);
        assert!((shape.duration - 0.014).abs() < 1e-12);
    }

    #[test]
    fn master_gain_normalises_loudest_click() {
        let (host, emitter) = emitter();
        let master = emitter.master();
        assert!(host.calls().contains(&HostCall::SetGain {
            gain: master,
            value: 0.25,
            at: 0.0
        }));
    }

    #[test]
    fn emits_envelope_in_order() {
        let (host, mut emitter) = emitter();
        host.clear();

        emitter.emit(2, 1.0, 120.0);
        let calls = host.calls();

        let tone = match calls[0] {
            HostCall::CreateTone(tone) => tone,
            ref other => panic!("expected the successor tone first, got {other:?}"),
        };
        let started = calls
            .iter()
            .find_map(|call| match call {
                HostCall::Start { tone, .. } => Some(*tone),
                _ => None,
            })
            .unwrap();
        assert_ne!(started, tone, "the pre-allocated tone plays, not the new one");

        let envelope: Vec<&HostCall> = calls
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    HostCall::CancelGain(_) | HostCall::SetGain { .. } | HostCall::RampGain { .. }
                )
            })
            .collect();
        assert!(matches!(envelope[0], HostCall::CancelGain(_)));
        assert!(matches!(envelope[1], HostCall::SetGain { value, at, .. } if *value == 0.0 && (*at - 0.999).abs() < 1e-12));
        assert!(matches!(envelope[2], HostCall::RampGain { target, at, .. } if *target == 3.0 && *at == 1.0));
        assert!(matches!(envelope[3], HostCall::RampGain { target, at, .. } if *target == 0.0 && (*at - 1.029).abs() < 1e-12));

        let tones = host.tones();
        assert_eq!(tones.len(), 1);
        assert_eq!(tones[0].frequency, Some(864.0));
        assert!((tones[0].start - 0.999).abs() < 1e-12);
        assert!((tones[0].stop.unwrap() - 1.029).abs() < 1e-12);
    }

    #[test]
    fn every_click_uses_a_fresh_generator() {
        let (host, mut emitter) = emitter();
        emitter.emit(1, 1.0, 120.0);
        emitter.emit(2, 1.5, 120.0);
        emitter.emit(3, 2.0, 120.0);

        let tones = host.tones();
        assert_eq!(tones.len(), 3);
        assert_ne!(tones[0].tone, tones[1].tone);
        assert_ne!(tones[1].tone, tones[2].tone);
    }
}
