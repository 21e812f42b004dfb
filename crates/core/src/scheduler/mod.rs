//! Lookahead beat scheduler.
//!
//! A coarse polling loop keeps one or two future beats staged and hands each
//! one to the [`SoundEmitter`] shortly before it is due. Beat times are always
//! derived by adding the beat interval to the previous beat's time, so polling
//! jitter never accumulates into drift.

pub mod timer;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioHost,
    config::{AppConfig, SchedulerConfig, ToneConfig},
    emitter::SoundEmitter,
    MetronomeError, Result,
};

pub use timer::{PendingPoll, PollTimer, PollToken};

const MAX_QUEUED: usize = 2;

/// Tempo in beats per minute and the number of beats per bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rhythm {
    pub tempo: f64,
    pub beats: u32,
}

impl Rhythm {
    /// Validated constructor for values coming from outside the core.
    pub fn new(tempo: f64, beats: u32) -> Result<Self> {
        if tempo.is_finite() && tempo > 0.0 && beats >= 1 {
            Ok(Self { tempo, beats })
        } else {
            Err(MetronomeError::InvalidRhythm { tempo, beats })
        }
    }

    /// Seconds between two consecutive beats.
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.tempo
    }
}

/// One future click.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Host clock time of the beat.
    pub time: f64,
    /// Position in the bar, starting at 1.
    pub beat: u32,
    /// Tempo the beat was staged with; shapes the click length.
    pub tempo: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stopped,
    Running,
}

/// How the first beat after a start is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Right away, after the configured immediate delay.
    #[default]
    Immediate,
    /// One beat interval from now.
    NextInterval,
}

#[derive(Debug, Clone, Copy)]
enum Staging {
    Immediate { beat: u32 },
    Extrapolate { beat: u32 },
}

/// Position following `previous` in a bar of `beats`.
fn following_beat(previous: u32, beats: u32) -> u32 {
    1 + previous % beats
}

/// Drift-free metronome scheduler over an [`AudioHost`].
///
/// # Preconditions
///
/// Tempo must be a positive finite number and beats at least one. Values from
/// user input should go through [`Rhythm::new`]; the scheduler does not
/// validate again.
#[derive(Debug)]
pub struct BeatScheduler<H> {
    emitter: SoundEmitter<H>,
    config: SchedulerConfig,
    rhythm: Rhythm,
    transport: Transport,
    /// Nearest beat first.
    queue: VecDeque<BeatEvent>,
    timer: PollTimer,
}

impl<H: AudioHost> BeatScheduler<H> {
    pub fn new(host: H, rhythm: Rhythm, config: SchedulerConfig, tone: ToneConfig) -> Self {
        debug_assert!(Rhythm::new(rhythm.tempo, rhythm.beats).is_ok());
        Self {
            emitter: SoundEmitter::new(host, tone),
            config,
            rhythm,
            transport: Transport::Stopped,
            queue: VecDeque::with_capacity(MAX_QUEUED + 1),
            timer: PollTimer::new(),
        }
    }

    pub fn from_config(host: H, config: &AppConfig) -> Result<Self> {
        let rhythm = Rhythm::new(config.session.tempo, config.session.beats)?;
        Ok(Self::new(
            host,
            rhythm,
            config.scheduler.clone(),
            config.tone.clone(),
        ))
    }

    pub fn tempo(&self) -> f64 {
        self.rhythm.tempo
    }

    pub fn beats(&self) -> u32 {
        self.rhythm.beats
    }

    pub fn rhythm(&self) -> Rhythm {
        self.rhythm
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_running(&self) -> bool {
        self.transport == Transport::Running
    }

    pub fn host(&self) -> &H {
        self.emitter.host()
    }

    /// Staged beats, nearest first.
    pub fn pending_events(&self) -> Vec<BeatEvent> {
        self.queue.iter().copied().collect()
    }

    /// The poll a driver should wait for, if the loop is armed.
    pub fn pending_poll(&self) -> Option<PendingPoll> {
        self.timer.pending()
    }

    pub fn start(&mut self, beat: u32) {
        self.start_with(beat, StartMode::Immediate);
    }

    pub fn start_with(&mut self, beat: u32, mode: StartMode) {
        self.transport = Transport::Running;
        self.queue.clear();
        tracing::debug!(beat, ?mode, tempo = self.rhythm.tempo, "metronome started");

        let staging = match mode {
            StartMode::Immediate => Staging::Immediate { beat },
            StartMode::NextInterval => Staging::Extrapolate { beat },
        };
        self.run_loop(staging);
    }

    /// Stops the metronome. No beat is dispatched afterwards, even for a poll
    /// token handed out before the stop.
    pub fn stop(&mut self) {
        self.queue.clear();
        self.transport = Transport::Stopped;
        self.timer.cancel();
        tracing::debug!("metronome stopped");
    }

    pub fn toggle(&mut self) {
        if self.is_running() {
            self.stop();
        } else {
            self.start(1);
        }
    }

    /// Drops staged beats and, when running, restarts from the first beat.
    pub fn reset(&mut self) {
        self.queue.clear();
        if self.is_running() {
            self.run_loop(Staging::Immediate { beat: 1 });
        }
    }

    /// Plays a single preview click right away without touching the
    /// transport or the staged beats.
    pub fn tick(&mut self) -> BeatEvent {
        let event = BeatEvent {
            time: self.emitter.now() + self.config.immediate_delay,
            beat: 1,
            tempo: self.config.preview_tempo,
        };
        self.emitter.emit(event.beat, event.time, event.tempo);
        event
    }

    /// Changes tempo and beats per bar.
    ///
    /// A new bar length restarts at the first beat. A tempo change alone keeps
    /// the next beat where it was unless the new tempo brings it more than
    /// `retime_threshold` seconds earlier.
    pub fn set_rhythm(&mut self, rhythm: Rhythm) {
        debug_assert!(Rhythm::new(rhythm.tempo, rhythm.beats).is_ok());
        let beats_changed = rhythm.beats != self.rhythm.beats;
        self.rhythm = rhythm;

        if !self.is_running() {
            return;
        }

        if beats_changed {
            self.queue.clear();
            self.run_loop(Staging::Immediate { beat: 1 });
            return;
        }

        if let Some(next) = self.queue.front().copied() {
            self.queue.clear();
            let now = self.emitter.now();
            self.push_if_earlier(next.beat.saturating_sub(1), now, next.time);
        }
        self.run_loop(Staging::Immediate { beat: 1 });
    }

    /// Runs the poll identified by `token`. Stale or cancelled tokens do
    /// nothing. Returns the beat handed to the emitter, if any.
    pub fn fire(&mut self, token: PollToken) -> Option<BeatEvent> {
        if !self.timer.claim(token) {
            return None;
        }
        self.run_loop(Staging::Immediate { beat: 1 })
    }

    /// Fires the pending poll if it is due on the host clock.
    pub fn service(&mut self) -> Option<BeatEvent> {
        let token = self.timer.due_at(self.emitter.now())?;
        self.fire(token)
    }

    fn run_loop(&mut self, staging: Staging) -> Option<BeatEvent> {
        self.timer.cancel();
        if !self.is_running() {
            return None;
        }

        let dispatched = self.dispatch_due();
        let now = self.emitter.now();

        if self.queue.is_empty() {
            match (dispatched, staging) {
                // Continue the bar from the beat that just went out instead of
                // restarting it.
                (Some(last), _) => self.push_after(last.beat, last.time),
                (None, Staging::Immediate { beat }) => self.queue.push_back(BeatEvent {
                    time: now + self.config.immediate_delay,
                    beat,
                    tempo: self.rhythm.tempo,
                }),
                (None, Staging::Extrapolate { beat }) => {
                    self.push_after(beat.saturating_sub(1), now)
                }
            }
        }

        if let (1, Some(last)) = (self.queue.len(), self.queue.back().copied()) {
            self.push_after(last.beat, last.time);
        }

        self.timer.arm(now + self.config.poll_interval);
        tracing::trace!(now, queued = self.queue.len(), "poll");
        dispatched
    }

    fn dispatch_due(&mut self) -> Option<BeatEvent> {
        let now = self.emitter.now();
        let due = self
            .queue
            .front()
            .is_some_and(|next| next.time - now < self.config.lookahead);
        if !due {
            return None;
        }

        let event = self.queue.pop_front()?;
        self.emitter.emit(event.beat, event.time, event.tempo);
        tracing::debug!(beat = event.beat, time = event.time, "beat dispatched");
        Some(event)
    }

    fn push_after(&mut self, previous_beat: u32, previous_time: f64) {
        self.queue.push_back(BeatEvent {
            time: previous_time + self.rhythm.beat_interval(),
            beat: following_beat(previous_beat, self.rhythm.beats),
            tempo: self.rhythm.tempo,
        });
    }

    fn push_if_earlier(&mut self, previous_beat: u32, previous_time: f64, superseded: f64) {
        let candidate = previous_time + self.rhythm.beat_interval();
        let time = if candidate + self.config.retime_threshold < superseded {
            candidate
        } else {
            superseded
        };
        self.queue.push_back(BeatEvent {
            time,
            beat: following_beat(previous_beat, self.rhythm.beats),
            tempo: self.rhythm.tempo,
        });
    }
}
