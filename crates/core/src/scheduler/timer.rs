/// Identifies one arming of a [`PollTimer`]. Tokens from earlier armings are
/// stale and never fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollToken(u64);

/// The single pending poll, as seen by whatever drives the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingPoll {
    pub token: PollToken,
    /// Host clock time at which the poll should run.
    pub due: f64,
}

/// One-shot timer slot with cancel-before-rearm semantics.
#[derive(Debug, Default)]
pub struct PollTimer {
    generation: u64,
    armed: Option<PendingPoll>,
}

impl PollTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the pending poll, if any. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// Replaces any pending poll with a new one due at `due`.
    pub fn arm(&mut self, due: f64) -> PollToken {
        self.generation += 1;
        let token = PollToken(self.generation);
        self.armed = Some(PendingPoll { token, due });
        token
    }

    pub fn pending(&self) -> Option<PendingPoll> {
        self.armed
    }

    /// Consumes the pending poll when `token` is the current one.
    pub fn claim(&mut self, token: PollToken) -> bool {
        match self.armed {
            Some(pending) if pending.token == token => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Token of the pending poll if it is due at `now`.
    pub fn due_at(&self, now: f64) -> Option<PollToken> {
        self.armed
            .filter(|pending| pending.due <= now)
            .map(|pending| pending.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearming_invalidates_previous_token() {
        let mut timer = PollTimer::new();
        let first = timer.arm(1.0);
        let second = timer.arm(2.0);

        assert!(!timer.claim(first));
        assert!(timer.claim(second));
        assert!(timer.pending().is_none());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timer = PollTimer::new();
        let token = timer.arm(1.0);
        timer.cancel();
        timer.cancel();

        assert!(!timer.claim(token));
    }

    #[test]
    fn reports_due_polls_only() {
        let mut timer = PollTimer::new();
        let token = timer.arm(1.0);

        assert_eq!(timer.due_at(0.5), None);
        assert_eq!(timer.due_at(1.0), Some(token));
    }
}
