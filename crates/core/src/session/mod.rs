//! Application state tying the tap estimator to the beat scheduler.
//!
//! The session owns the `{ tempo, beats, running }` triple. Every change goes
//! through one private update step, which forwards only what actually
//! changed to the scheduler.

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioHost,
    config::{AppConfig, SessionConfig},
    scheduler::{BeatEvent, BeatScheduler, PendingPoll, Rhythm},
    tap::{TapEstimator, TapOutcome},
    Result,
};

/// Beats per bar the tempo display is normalised to.
const REFERENCE_BEATS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetronomeState {
    pub tempo: f64,
    pub beats: u32,
    pub running: bool,
}

#[derive(Debug)]
pub struct MetronomeSession<H> {
    scheduler: BeatScheduler<H>,
    estimator: TapEstimator<H>,
    config: SessionConfig,
    state: MetronomeState,
}

impl<H: AudioHost + Clone> MetronomeSession<H> {
    /// Builds a stopped session. The host clock also timestamps taps.
    pub fn new(host: H, config: &AppConfig) -> Result<Self> {
        let scheduler = BeatScheduler::from_config(host.clone(), config)?;
        let estimator = TapEstimator::new(host, config.tap.clone());
        let state = MetronomeState {
            tempo: scheduler.tempo(),
            beats: scheduler.beats(),
            running: false,
        };

        Ok(Self {
            scheduler,
            estimator,
            config: config.session.clone(),
            state,
        })
    }

    pub fn state(&self) -> MetronomeState {
        self.state
    }

    pub fn scheduler(&self) -> &BeatScheduler<H> {
        &self.scheduler
    }

    pub fn estimator(&self) -> &TapEstimator<H> {
        &self.estimator
    }

    pub fn pending_poll(&self) -> Option<PendingPoll> {
        self.scheduler.pending_poll()
    }

    /// Runs the scheduler's poll if it is due.
    pub fn service(&mut self) -> Option<BeatEvent> {
        self.scheduler.service()
    }

    /// Tempo as shown to the user: normalised to a four-beat bar.
    pub fn display_tempo(&self) -> u32 {
        (REFERENCE_BEATS as f64 * self.state.tempo / self.state.beats as f64).round() as u32
    }

    /// Subdivision relative to a four-beat bar.
    pub fn multiplier(&self) -> f64 {
        self.state.beats as f64 / REFERENCE_BEATS as f64
    }

    pub fn start(&mut self) {
        self.update(MetronomeState {
            running: true,
            ..self.state
        });
    }

    pub fn stop(&mut self) {
        self.update(MetronomeState {
            running: false,
            ..self.state
        });
    }

    pub fn toggle(&mut self) {
        if self.state.running {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn set_rhythm(&mut self, tempo: f64, beats: u32) -> Result<()> {
        let rhythm = Rhythm::new(tempo, beats)?;
        self.update(MetronomeState {
            tempo: rhythm.tempo,
            beats: rhythm.beats,
            ..self.state
        });
        Ok(())
    }

    pub fn set_tempo(&mut self, tempo: f64) -> Result<()> {
        self.set_rhythm(tempo, self.state.beats)
    }

    /// Sets the tempo from a display value. `commit` also starts the
    /// metronome, as confirming an entered tempo does.
    pub fn set_display_tempo(&mut self, display: f64, commit: bool) -> Result<()> {
        let tempo = self.state.beats as f64 * display / REFERENCE_BEATS as f64;
        let rhythm = Rhythm::new(tempo, self.state.beats)?;
        self.update(MetronomeState {
            tempo: rhythm.tempo,
            running: self.state.running || commit,
            ..self.state
        });
        Ok(())
    }

    /// Subdivides (or groups) the bar while keeping the display tempo.
    /// A multiplier of exactly 1 returns to a four-beat bar. Returns whether
    /// anything changed.
    pub fn apply_multiplier(&mut self, multiplier: f64) -> bool {
        let MetronomeState { tempo, beats, .. } = self.state;

        let next = if multiplier == 1.0 {
            MetronomeState {
                beats: REFERENCE_BEATS,
                tempo: REFERENCE_BEATS as f64 * tempo / beats as f64,
                ..self.state
            }
        } else {
            let scaled = beats as f64 * multiplier;
            if !(tempo * multiplier < self.config.max_tempo && scaled >= 1.0) {
                tracing::debug!(multiplier, tempo, beats, "multiplier out of range");
                return false;
            }
            let new_beats = scaled.round() as u32;
            MetronomeState {
                beats: new_beats,
                tempo: new_beats as f64 * tempo / beats as f64,
                ..self.state
            }
        };

        let changed = next != self.state;
        self.update(next);
        changed
    }

    /// Registers a tap at the host clock time and reacts to it.
    pub fn tap(&mut self) -> TapOutcome {
        let outcome = self.estimator.tap();
        self.apply_tap(outcome);
        outcome
    }

    /// Registers a tap at an explicit timestamp in milliseconds.
    pub fn tap_at(&mut self, timestamp_ms: f64) -> TapOutcome {
        let outcome = self.estimator.tap_at(timestamp_ms);
        self.apply_tap(outcome);
        outcome
    }

    fn apply_tap(&mut self, outcome: TapOutcome) {
        match outcome {
            TapOutcome::Tempo(bpm) if bpm > 0 => self.update(MetronomeState {
                tempo: bpm as f64,
                running: true,
                ..self.state
            }),
            TapOutcome::Tempo(_) | TapOutcome::Steady(_) | TapOutcome::Ignored => {}
            TapOutcome::Estimate(bpm) => {
                self.interrupt_for_tap();
                if bpm > 0 {
                    self.update(MetronomeState {
                        tempo: bpm as f64,
                        ..self.state
                    });
                }
            }
            TapOutcome::Started | TapOutcome::TimedOut | TapOutcome::Outlier => {
                self.interrupt_for_tap();
            }
        }
    }

    // A tap that has not settled a tempo silences the metronome and echoes
    // the tap with a preview click.
    fn interrupt_for_tap(&mut self) {
        self.stop();
        if self.config.preview_on_tap {
            self.scheduler.tick();
        }
    }

    // Applies `next`, forwarding rhythm changes before transport changes so
    // a start always uses the new rhythm. Callers validate the rhythm first.
    fn update(&mut self, next: MetronomeState) {
        let previous = self.state;
        if next == previous {
            return;
        }
        self.state = next;

        if next.tempo != previous.tempo || next.beats != previous.beats {
            self.scheduler.set_rhythm(Rhythm {
                tempo: next.tempo,
                beats: next.beats,
            });
        }

        if next.running != previous.running {
            if next.running {
                self.scheduler.start(1);
            } else {
                self.scheduler.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingHost;

    fn session() -> (RecordingHost, MetronomeSession<RecordingHost>) {
        let host = RecordingHost::new();
        let session = MetronomeSession::new(host.clone(), &AppConfig::default()).unwrap();
        (host, session)
    }

    #[test]
    fn starts_stopped_with_configured_rhythm() {
        let (_, session) = session();
        let state = session.state();

        assert_eq!(state.tempo, 120.0);
        assert_eq!(state.beats, 4);
        assert!(!state.running);
        assert_eq!(session.display_tempo(), 120);
        assert_eq!(session.multiplier(), 1.0);
    }

    #[test]
    fn steady_tapping_starts_the_metronome() {
        let (host, mut session) = session();
        let mut time = 0.0;
        session.tap_at(time);
        for _ in 0..4 {
            time += 400.0;
            session.tap_at(time);
        }

        let state = session.state();
        assert!(state.running);
        assert_eq!(state.tempo, 150.0);
        assert_eq!(session.scheduler().tempo(), 150.0);
        assert!(session.scheduler().is_running());

        // A consistent tap keeps it running.
        let calls = host.call_count();
        assert!(matches!(session.tap_at(time + 400.0), TapOutcome::Steady(150)));
        assert!(session.state().running);
        assert_eq!(host.call_count(), calls);
    }

    #[test]
    fn unsettled_taps_stop_and_preview() {
        let (host, mut session) = session();
        session.start();
        assert!(session.state().running);
        host.clear();

        assert_eq!(session.tap_at(0.0), TapOutcome::Started);
        assert!(!session.state().running);
        assert_eq!(host.tones().len(), 1);

        assert_eq!(session.tap_at(600.0), TapOutcome::Estimate(100));
        assert_eq!(session.state().tempo, 100.0);
        assert!(!session.state().running);
        assert_eq!(host.tones().len(), 2);
    }

    #[test]
    fn invalid_tap_timestamps_are_skipped() {
        let (_, mut session) = session();
        assert_eq!(session.tap_at(f64::NAN), TapOutcome::Ignored);
        assert_eq!(session.tap_at(500.0), TapOutcome::Started);
        assert_eq!(session.tap_at(f64::INFINITY), TapOutcome::Ignored);
        assert_eq!(session.tap_at(f64::NEG_INFINITY), TapOutcome::Ignored);
        assert_eq!(session.tap_at(900.0), TapOutcome::Estimate(150));

        assert_eq!(session.state().tempo, 150.0);
        assert_eq!(session.scheduler().tempo(), 150.0);
    }

    #[test]
    fn preview_can_be_disabled() {
        let host = RecordingHost::new();
        let mut config = AppConfig::default();
        config.session.preview_on_tap = false;
        let mut session = MetronomeSession::new(host.clone(), &config).unwrap();

        session.tap_at(0.0);
        session.tap_at(500.0);
        assert!(host.tones().is_empty());
    }

    #[test]
    fn multiplier_keeps_display_tempo() {
        let (_, mut session) = session();

        assert!(session.apply_multiplier(2.0));
        assert_eq!(session.state().beats, 8);
        assert_eq!(session.state().tempo, 240.0);
        assert_eq!(session.display_tempo(), 120);

        assert!(session.apply_multiplier(0.25));
        assert_eq!(session.state().beats, 2);
        assert_eq!(session.state().tempo, 60.0);
        assert_eq!(session.display_tempo(), 120);

        assert!(session.apply_multiplier(1.0));
        assert_eq!(session.state().beats, 4);
        assert_eq!(session.state().tempo, 120.0);
        assert!(!session.apply_multiplier(1.0));
    }

    #[test]
    fn multiplier_respects_limits() {
        let (_, mut session) = session();
        session.set_rhythm(300.0, 4).unwrap();
        assert!(!session.apply_multiplier(2.0));

        session.set_rhythm(60.0, 1).unwrap();
        assert!(!session.apply_multiplier(0.5));
        assert_eq!(session.state().beats, 1);
    }

    #[test]
    fn display_tempo_maps_through_beats() {
        let (_, mut session) = session();
        session.apply_multiplier(2.0);

        session.set_display_tempo(100.0, false).unwrap();
        assert_eq!(session.state().tempo, 200.0);
        assert!(!session.state().running);

        session.set_display_tempo(90.0, true).unwrap();
        assert_eq!(session.state().tempo, 180.0);
        assert!(session.state().running);
        assert!(session.scheduler().is_running());
    }

    #[test]
    fn rejects_invalid_rhythm() {
        let (_, mut session) = session();
        assert!(session.set_tempo(-5.0).is_err());
        assert!(session.set_rhythm(120.0, 0).is_err());
        assert_eq!(session.state().tempo, 120.0);
    }

    #[test]
    fn toggle_drives_the_scheduler() {
        let (_, mut session) = session();
        session.toggle();
        assert!(session.scheduler().is_running());
        assert!(session.pending_poll().is_some());

        session.toggle();
        assert!(!session.scheduler().is_running());
        assert!(session.pending_poll().is_none());
    }

    #[test]
    fn rhythm_change_reaches_a_running_scheduler() {
        let (host, mut session) = session();
        session.start();
        host.advance(0.2);
        session.set_rhythm(90.0, 3).unwrap();

        assert_eq!(session.scheduler().beats(), 3);
        let events = session.scheduler().pending_events();
        assert_eq!(events[0].beat, 1);
        assert!((events[0].time - 0.22).abs() < 1e-12);
    }
}
