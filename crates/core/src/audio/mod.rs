//! Host audio API consumed by the sound emitter.
//!
//! The trait mirrors a node-based audio engine: tone generators with a
//! frequency parameter, gain nodes with time-scheduled automation, and a
//! monotonic clock that every scheduling call refers to. Scheduling calls are
//! infallible; only constructing a host can fail.

pub mod automation;
#[cfg(feature = "device")]
pub mod device;
pub mod recording;
pub mod synth;

use crate::Clock;

pub use automation::ParamTimeline;
#[cfg(feature = "device")]
pub use device::DeviceOutput;
pub use recording::{HostCall, RecordingHost, ToneRecord};
pub use synth::SynthHost;

/// One-shot sine tone generator owned by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToneHandle(pub u64);

/// Gain node owned by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GainHandle(pub u64);

/// Where a node sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Gain(GainHandle),
    Destination,
}

pub trait AudioHost: Clock {
    fn create_tone_generator(&mut self) -> ToneHandle;
    fn create_gain(&mut self) -> GainHandle;
    fn connect_tone(&mut self, tone: ToneHandle, sink: Sink);
    fn connect_gain(&mut self, gain: GainHandle, sink: Sink);
    /// Jumps the gain to `value` at `at`.
    fn set_gain(&mut self, gain: GainHandle, value: f64, at: f64);
    /// Ramps linearly from the previous automation point to `target`,
    /// reaching it exactly at `at`.
    fn ramp_gain(&mut self, gain: GainHandle, target: f64, at: f64);
    /// Drops every automation point previously scheduled on `gain`.
    fn cancel_gain_values(&mut self, gain: GainHandle);
    fn set_frequency(&mut self, tone: ToneHandle, hz: f64, at: f64);
    fn cancel_frequency_values(&mut self, tone: ToneHandle);
    fn start(&mut self, tone: ToneHandle, at: f64);
    fn stop(&mut self, tone: ToneHandle, at: f64);
}
