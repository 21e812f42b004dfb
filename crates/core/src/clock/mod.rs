//! Monotonic time sources shared by scheduling and tap timestamping.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// A monotonically increasing clock measured in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(seconds: f64) -> Self {
        let clock = Self::new();
        clock.set(seconds);
        clock
    }

    /// Jumps to `seconds`. Moving backwards is ignored to keep the clock
    /// monotonic.
    pub fn set(&self, seconds: f64) {
        if seconds >= self.now() {
            self.bits.store(seconds.to_bits(), Ordering::SeqCst);
        }
    }

    pub fn advance(&self, delta: f64) {
        self.set(self.now() + delta.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();

        clock.advance(1.5);
        assert_eq!(other.now(), 1.5);
    }

    #[test]
    fn manual_clock_never_runs_backwards() {
        let clock = ManualClock::at(2.0);
        clock.set(1.0);
        clock.advance(-3.0);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock::start();
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now() > first);
    }
}
