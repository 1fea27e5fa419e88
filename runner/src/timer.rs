use std::time::Duration;
use std::time::Instant;

/// Makes [`check`](Self::check) return true once every `interval`.
///
/// Purely passive: time only advances when checked, so a slow loop simply
/// fires late rather than accumulating missed ticks.
#[derive(Debug)]
pub struct LoopingTimer {
    interval: Duration,
    next_run: Option<Instant>,
    trigger_at_start: bool,
}

impl LoopingTimer {
    /// A timer that fires on its first check, then every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_run: None,
            trigger_at_start: true,
        }
    }

    /// A timer that waits a full `interval` before its first firing.
    pub fn delayed(interval: Duration) -> Self {
        Self {
            interval,
            next_run: None,
            trigger_at_start: false,
        }
    }

    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        let next_run = *self.next_run.get_or_insert_with(|| {
            if self.trigger_at_start {
                now
            } else {
                now + self.interval
            }
        });
        if now >= next_run {
            self.next_run = Some(now + self.interval);
            return true;
        }
        false
    }
}
