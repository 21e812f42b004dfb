//! Core library for the tap-tempo metronome.
//!
//! The [`scheduler`] keeps a couple of beats staged ahead of the audio clock
//! and hands each one to the [`emitter`], which plays it as a short enveloped
//! tone on an [`AudioHost`]. The [`tap`] estimator turns tap timestamps into a
//! tempo, and [`session`] wires the two together the way the interactive
//! application uses them.

pub mod analysis;
pub mod audio;
pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod tap;

pub use analysis::{ClickAnalyzer, ClickFeature, ClickReport};
#[cfg(feature = "device")]
pub use audio::DeviceOutput;
pub use audio::{AudioHost, GainHandle, HostCall, RecordingHost, Sink, SynthHost, ToneHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, AudioConfig, SchedulerConfig, SessionConfig, TapConfig, ToneConfig,
};
pub use emitter::{ClickShape, SoundEmitter};
pub use error::{MetronomeError, Result};
pub use scheduler::{BeatEvent, BeatScheduler, PendingPoll, PollToken, Rhythm, StartMode, Transport};
pub use session::{MetronomeSession, MetronomeState};
pub use tap::{TapEstimator, TapEvent, TapOutcome};
